//! JSON recovery over the shapes models actually produce.

use agentflow::parser::{parse_json_object, parse_or_empty, JsonMap};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn object(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn samples() -> Vec<Value> {
    vec![
        json!({"functional_requirements": ["login"]}),
        json!({"signal": "bullish", "confidence": 0.7, "details": {"rsi": 61, "macd": [1, 2]}}),
        json!({"text": "braces } and { inside strings", "nested": {"deep": {"deeper": true}}}),
        json!({"unicode": "café ✓", "empty": {}, "list": []}),
    ]
}

#[test]
fn valid_json_is_recovered_from_every_wrapping() {
    for sample in samples() {
        let expected = object(sample.clone());
        let compact = sample.to_string();
        let pretty = serde_json::to_string_pretty(&sample).unwrap();

        let wrappings = [
            compact.clone(),
            format!("  {pretty}\n"),
            format!("```json\n{pretty}\n```"),
            format!("```\n{compact}\n```"),
            format!("Sure! Here is the result:\n{compact}\nHope this helps."),
            format!("<think>Let me consider {{ this }} first.</think>\n{compact}"),
            format!("Analysis below.\n\n```JSON\n{pretty}\n```\n\nDone."),
        ];

        for text in wrappings {
            assert_eq!(parse_json_object(&text).unwrap(), expected, "input: {text}");
        }
    }
}

#[test]
fn text_without_json_yields_empty_map() {
    let inputs = [
        "",
        "   ",
        "I cannot answer that.",
        "{ not json at all }",
        "[1, 2, 3]",
        "\"just a string\"",
        "```json\n```",
        "{\"unterminated\": ",
    ];

    for text in inputs {
        assert!(parse_json_object(text).is_err(), "input: {text:?}");
        assert!(parse_or_empty(text).is_empty(), "input: {text:?}");
    }
}

#[test]
fn object_is_found_between_other_braces() {
    let text = r#"Options {a|b}. Answer: {"action": "hold", "quantity": 0} (final)"#;
    assert_eq!(
        parse_json_object(text).unwrap(),
        object(json!({"action": "hold", "quantity": 0}))
    );
}

#[test]
fn full_width_punctuation_is_normalized() {
    let text = "｛\"signal\"：\"neutral\"，\"confidence\"：0.5｝";
    assert_eq!(
        parse_json_object(text).unwrap(),
        object(json!({"signal": "neutral", "confidence": 0.5}))
    );
}

#[test]
fn reasoning_tags_inside_string_values_are_kept() {
    let text = r#"{"note": "<think>x</think>", "a": 1}"#;
    assert_eq!(
        parse_json_object(text).unwrap(),
        object(json!({"note": "<think>x</think>", "a": 1}))
    );

    let fenced = format!("<think>draft</think>\n```json\n{text}\n```");
    assert_eq!(parse_json_object(&fenced).unwrap()["note"], json!("<think>x</think>"));
}

#[test]
fn failure_reports_strategies_tried() {
    let failure = parse_json_object("nothing here").unwrap_err();
    assert!(failure.strategies_tried.contains(&"whole_text"));
    assert!(!failure.reason.is_empty());
}

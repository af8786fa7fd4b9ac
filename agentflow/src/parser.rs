//! Recovery of JSON objects from free-form LLM text.
//!
//! Models are asked for JSON but routinely wrap it in prose, markdown fences
//! or reasoning blocks. [`parse_json_object`] tries, in order:
//!
//! 1. the whole text,
//! 2. each fenced code block (```` ```json ```` or bare ```` ``` ````),
//! 3. brace-delimited substrings, longest first,
//! 4. steps 2-3 again after normalising full-width punctuation and control
//!    characters.
//!
//! Only JSON objects count. Step 4 runs only after every strict strategy has
//! failed, so well-formed JSON is always returned exactly as written.

use crate::errors::ParseFailure;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// A JSON object.
pub type JsonMap = Map<String, Value>;

const STRATEGY_WHOLE: &str = "whole_text";
const STRATEGY_FENCED: &str = "fenced_block";
const STRATEGY_SPAN: &str = "brace_span";
const STRATEGY_BALANCED: &str = "balanced_object";
const STRATEGY_NORMALIZED: &str = "normalized";

/// Upper bound on balanced-object candidates examined per text.
const MAX_CANDIDATES: usize = 64;

#[allow(clippy::expect_used)]
fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?is)```[ \t]*(?:json)?\s*(.*?)\s*```").expect("fence regex is valid"))
}

/// Extracts the first JSON object found in `text`.
///
/// Never panics. On failure the returned [`ParseFailure`] lists every
/// strategy that was tried and a warning is logged.
pub fn parse_json_object(text: &str) -> Result<JsonMap, ParseFailure> {
    let mut tried = vec![STRATEGY_WHOLE];

    // String values may legitimately contain reasoning tags.
    if let Some(map) = as_object(text.trim()) {
        debug!(strategy = STRATEGY_WHOLE, "Parsed JSON object from LLM response");
        return Ok(map);
    }

    let stripped = strip_think_tags(text);
    let trimmed = stripped.trim();

    if trimmed.is_empty() {
        warn!("LLM response was empty");
        return Err(ParseFailure::new("empty response", tried));
    }

    if let Some(map) = as_object(trimmed) {
        debug!(strategy = STRATEGY_WHOLE, "Parsed JSON object after removing reasoning");
        return Ok(map);
    }

    if let Some((strategy, map)) = strict_strategies(trimmed, &mut tried) {
        debug!(strategy, "Parsed JSON object from LLM response");
        return Ok(map);
    }

    // The reasoning block itself may be the only place the model wrote JSON.
    if stripped.len() != text.len() {
        if let Some((strategy, map)) = strict_strategies(text, &mut Vec::new()) {
            debug!(strategy, "Parsed JSON object from inside a reasoning block");
            return Ok(map);
        }
    }

    tried.push(STRATEGY_NORMALIZED);
    let normalized = normalize_punctuation(trimmed);
    if let Some(map) = as_object(normalized.trim()) {
        debug!(strategy = STRATEGY_NORMALIZED, "Parsed JSON object after normalisation");
        return Ok(map);
    }
    if let Some((strategy, map)) = strict_strategies(&normalized, &mut Vec::new()) {
        debug!(strategy, "Parsed JSON object after normalisation");
        return Ok(map);
    }

    let failure = ParseFailure::new("no candidate parsed as a JSON object", tried);
    warn!(
        response_preview = %preview(text, 200),
        error = %failure,
        "Could not extract JSON from LLM response"
    );
    Err(failure)
}

/// Like [`parse_json_object`], but yields an empty map on failure.
///
/// Callers must read an empty map as "no structured data obtained".
#[must_use]
pub fn parse_or_empty(text: &str) -> JsonMap {
    parse_json_object(text).unwrap_or_default()
}

fn strict_strategies(text: &str, tried: &mut Vec<&'static str>) -> Option<(&'static str, JsonMap)> {
    tried.push(STRATEGY_FENCED);
    for caps in fence_regex().captures_iter(text) {
        if let Some(map) = caps.get(1).and_then(|m| as_object(m.as_str())) {
            return Some((STRATEGY_FENCED, map));
        }
    }

    tried.push(STRATEGY_SPAN);
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Some(map) = as_object(&text[start..=end]) {
                return Some((STRATEGY_SPAN, map));
            }
        }
    }

    tried.push(STRATEGY_BALANCED);
    let mut spans = balanced_object_spans(text);
    spans.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)));
    spans
        .into_iter()
        .take(MAX_CANDIDATES)
        .find_map(|(start, end)| as_object(&text[start..=end]))
        .map(|map| (STRATEGY_BALANCED, map))
}

fn as_object(candidate: &str) -> Option<JsonMap> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Byte spans (inclusive) of every balanced `{...}` group, at any depth.
///
/// Quotes are tracked inside braces so that braces in string values do not
/// unbalance the scan.
fn balanced_object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if !stack.is_empty() => in_string = true,
            '{' => stack.push(idx),
            '}' => {
                if let Some(start) = stack.pop() {
                    spans.push((start, idx));
                }
            }
            _ => {}
        }
    }
    spans
}

/// Removes `<think>...</think>` blocks emitted by reasoning models.
///
/// Tags inside a JSON string literal are kept. An unclosed block is stripped
/// to the end of the text.
#[must_use]
pub fn strip_think_tags(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut result = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while let Some(c) = text[i..].chars().next() {
        if depth == 0 && !in_string && text[i..].starts_with(OPEN) {
            match text[i..].find(CLOSE) {
                Some(end) => {
                    i += end + CLOSE.len();
                    continue;
                }
                None => return result,
            }
        }

        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else {
            match c {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                '"' if depth > 0 => in_string = true,
                _ => {}
            }
        }

        result.push(c);
        i += c.len_utf8();
    }
    result
}

/// Maps full-width punctuation to ASCII and blanks out control characters.
#[must_use]
pub fn normalize_punctuation(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '，' => ',',
            '：' => ':',
            '；' => ';',
            '“' | '”' | '＂' => '"',
            '‘' | '’' => '\'',
            '【' | '［' => '[',
            '】' | '］' => ']',
            '｛' => '{',
            '｝' => '}',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect()
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obj(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_plain_json() {
        let parsed = parse_json_object(r#"{"signal": "bullish", "confidence": 0.8}"#).unwrap();
        assert_eq!(parsed, obj(json!({"signal": "bullish", "confidence": 0.8})));
    }

    #[test]
    fn test_fenced_json_with_tag() {
        let text = "Here is the analysis:\n```json\n{\"issues\": []}\n```\nLet me know.";
        assert_eq!(parse_json_object(text).unwrap(), obj(json!({"issues": []})));
    }

    #[test]
    fn test_fenced_json_without_tag() {
        let text = "```\n{\"overview\": \"done\"}\n```";
        assert_eq!(parse_json_object(text).unwrap(), obj(json!({"overview": "done"})));
    }

    #[test]
    fn test_fenced_uppercase_tag() {
        let text = "```JSON\n{\"a\": 1}\n```";
        assert_eq!(parse_json_object(text).unwrap(), obj(json!({"a": 1})));
    }

    #[test]
    fn test_skips_invalid_fence_and_uses_next() {
        let text = "```json\n{not json}\n```\nthen\n```json\n{\"ok\": true}\n```";
        assert_eq!(parse_json_object(text).unwrap(), obj(json!({"ok": true})));
    }

    #[test]
    fn test_embedded_in_prose() {
        let text = "Sure! The result is {\"functional_requirements\": [\"login\"]} as requested.";
        assert_eq!(
            parse_json_object(text).unwrap(),
            obj(json!({"functional_requirements": ["login"]}))
        );
    }

    #[test]
    fn test_prose_braces_do_not_hide_json() {
        let text = "Use {placeholder} syntax. Answer: {\"risk_score\": 0.3, \"nested\": {\"a\": [1, 2]}}";
        assert_eq!(
            parse_json_object(text).unwrap(),
            obj(json!({"risk_score": 0.3, "nested": {"a": [1, 2]}}))
        );
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = "prefix {\"template\": \"use {name} here }\", \"n\": 1} suffix";
        assert_eq!(
            parse_json_object(text).unwrap(),
            obj(json!({"template": "use {name} here }", "n": 1}))
        );
    }

    #[test]
    fn test_largest_object_wins() {
        let text = "small {\"a\": 1} and big {\"b\": 2, \"c\": 3} end";
        assert_eq!(parse_json_object(text).unwrap(), obj(json!({"b": 2, "c": 3})));
    }

    #[test]
    fn test_think_tags_stripped() {
        let text = "<think>maybe {\"draft\": true}?</think>\n{\"final\": true}";
        assert_eq!(parse_json_object(text).unwrap(), obj(json!({"final": true})));
    }

    #[test]
    fn test_json_only_inside_think_block() {
        let text = "<think>{\"draft\": true}</think> I could not decide.";
        assert_eq!(parse_json_object(text).unwrap(), obj(json!({"draft": true})));
    }

    #[test]
    fn test_full_width_punctuation_recovered() {
        let text = "{“signal”： “neutral”， “confidence”： 0.5}";
        assert_eq!(
            parse_json_object(text).unwrap(),
            obj(json!({"signal": "neutral", "confidence": 0.5}))
        );
    }

    #[test]
    fn test_full_width_inside_valid_json_preserved() {
        let text = r#"{"summary": "登录，注册：完成"}"#;
        assert_eq!(parse_json_object(text).unwrap(), obj(json!({"summary": "登录，注册：完成"})));
    }

    #[test]
    fn test_no_json_returns_failure() {
        let failure = parse_json_object("I'm sorry, I cannot help with that.").unwrap_err();
        assert!(failure.strategies_tried.contains(&STRATEGY_WHOLE));
        assert!(failure.strategies_tried.contains(&STRATEGY_BALANCED));
        assert!(parse_or_empty("no json here").is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_json_object("   ").is_err());
        assert!(parse_or_empty("").is_empty());
    }

    #[test]
    fn test_arrays_are_not_objects() {
        assert!(parse_json_object(r#"["a", "b"]"#).is_err());
    }

    #[test]
    fn test_truncated_json_fails_cleanly() {
        assert!(parse_json_object(r#"{"a": [1, 2, "#).is_err());
    }

    #[test]
    fn test_strip_think_tags_unclosed() {
        assert_eq!(strip_think_tags("answer<think>rambling"), "answer");
        assert_eq!(strip_think_tags("a<think>x</think>b<think>y</think>c"), "abc");
        assert_eq!(
            strip_think_tags("<think>plan</think>{\"s\": \"<think>kept</think>\"}"),
            "{\"s\": \"<think>kept</think>\"}"
        );
    }

    #[test]
    fn test_balanced_spans_nested() {
        let spans = balanced_object_spans("{a{b}c}");
        assert_eq!(spans, vec![(2, 4), (0, 6)]);
    }
}

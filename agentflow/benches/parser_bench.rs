//! Benchmarks for JSON recovery from LLM text.

use agentflow::parser::parse_json_object;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const PLAIN: &str = r#"{"signal": "bullish", "confidence": 0.72, "reasoning": "uptrend", "details": {"rsi": 61.2}}"#;

fn wrapped_responses() -> Vec<(&'static str, String)> {
    vec![
        ("plain", PLAIN.to_string()),
        ("fenced", format!("Here is my analysis:\n```json\n{PLAIN}\n```\nLet me know.")),
        ("prose", format!("After weighing everything {{carefully}}, my answer is {PLAIN} as requested.")),
        (
            "think",
            format!("<think>{}</think>\n{PLAIN}", "considering the indicators. ".repeat(50)),
        ),
        ("no_json", "I am unable to provide an analysis for this ticker today. ".repeat(20)),
    ]
}

fn parser_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_json_object");
    for (name, text) in wrapped_responses() {
        group.bench_function(name, |b| b.iter(|| parse_json_object(black_box(&text))));
    }
    group.finish();
}

criterion_group!(benches, parser_benchmark);
criterion_main!(benches);

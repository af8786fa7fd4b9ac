//! Canned inputs and scripted clients for the ready-made pipelines.
//!
//! Routes match phrases from the built-in prompts, so these fixtures only
//! apply when no template override is configured.

use serde_json::json;

use super::ScriptedLlmClient;
use crate::stages::StageInput;

/// Prompt phrase identifying the requirements extractor.
pub const EXTRACTOR_PROMPT: &str = "requirements extraction specialist";
/// Prompt phrase identifying the requirements analyzer.
pub const ANALYZER_PROMPT: &str = "requirements analysis specialist";
/// Prompt phrase identifying the quality checker.
pub const CHECKER_PROMPT: &str = "requirements quality reviewer";
/// Prompt phrase identifying the documentation generator.
pub const GENERATOR_PROMPT: &str = "technical documentation writer";

/// Input for the requirements pipeline.
#[must_use]
pub fn requirements_input() -> StageInput {
    StageInput::from_text("system should support login")
}

/// A client answering every requirements stage with valid JSON, wrapped the
/// way models tend to wrap it.
#[must_use]
pub fn requirements_client() -> ScriptedLlmClient {
    ScriptedLlmClient::new()
        .respond(
            EXTRACTOR_PROMPT,
            "Here is what I found:\n```json\n{\"functional_requirements\": [\"login\"]}\n```",
        )
        .respond(ANALYZER_PROMPT, r#"{"technical_feasibility": ["ok"]}"#)
        .respond(CHECKER_PROMPT, r#"Review done. {"issues": []} Let me know if you need more."#)
        .respond(GENERATOR_PROMPT, r#"{"overview": "..."}"#)
}

/// Input for the investment pipeline.
#[must_use]
pub fn investment_input() -> StageInput {
    StageInput::new().with("ticker", "ACME").with(
        "market_data",
        json!({
            "prices": [101.5, 102.0, 99.8, 103.2],
            "pe_ratio": 18.4,
            "news": ["ACME beats earnings estimates"]
        }),
    )
}

/// A client answering every investment stage with valid JSON.
#[must_use]
pub fn investment_client() -> ScriptedLlmClient {
    ScriptedLlmClient::new()
        .respond(
            "technical analyst",
            r#"{"signal": "bullish", "confidence": 0.7, "reasoning": "uptrend"}"#,
        )
        .respond(
            "fundamentals analyst",
            r#"{"signal": "bullish", "confidence": 0.6, "reasoning": "margins improving"}"#,
        )
        .respond(
            "sentiment analyst",
            r#"{"signal": "neutral", "confidence": 0.5, "reasoning": "mixed news"}"#,
        )
        .respond(
            "valuation analyst",
            r#"{"signal": "bearish", "confidence": 0.55, "reasoning": "priced in"}"#,
        )
        .respond(
            "bullish researcher",
            r#"{"key_points": ["earnings beat"], "confidence": 0.65, "reasoning": "momentum"}"#,
        )
        .respond(
            "bearish researcher",
            r#"{"key_points": ["rich multiple"], "confidence": 0.45, "reasoning": "downside"}"#,
        )
        .respond(
            "investment debate",
            r#"{"signal": "bullish", "confidence": 0.6, "reasoning": "bull case stronger"}"#,
        )
        .respond(
            "risk manager",
            r#"{"risk_score": 0.4, "max_position_ratio": 0.2, "volatility": 0.25, "max_drawdown": 0.1}"#,
        )
        .respond(
            "portfolio manager",
            r#"{"action": "buy", "quantity": 100, "confidence": 0.6, "reasoning": "sized by risk"}"#,
        )
}

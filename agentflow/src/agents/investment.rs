//! The investment pipeline.
//!
//! Four analysts read the market data, a bull and a bear researcher argue
//! from their signals, the debate room weighs both sides, the risk manager
//! sizes the position and the portfolio manager makes the call.
//!
//! Input is `{"ticker": ..., "market_data": ...}`, optionally with a
//! `portfolio` object describing cash and holdings.

use super::{AgentFactory, PipelineOptions};
use crate::config::AgentflowConfig;
use crate::errors::AgentflowError;
use crate::llm::LlmClient;
use crate::payloads::{AnalystSignal, ResearchReport, RiskAssessment, Signal, TradingDecision};
use crate::pipeline::Coordinator;
use std::sync::Arc;

/// Pipeline name.
pub const PIPELINE: &str = "investment";

/// Price and volume patterns.
pub const TECHNICAL_ANALYST: &str = "technical_analyst";
/// Financial statements.
pub const FUNDAMENTALS_ANALYST: &str = "fundamentals_analyst";
/// News and social sentiment.
pub const SENTIMENT_ANALYST: &str = "sentiment_analyst";
/// Intrinsic value against price.
pub const VALUATION_ANALYST: &str = "valuation_analyst";
/// Argues the long case.
pub const BULL_RESEARCHER: &str = "bull_researcher";
/// Argues the short case.
pub const BEAR_RESEARCHER: &str = "bear_researcher";
/// Weighs bull against bear.
pub const DEBATE_ROOM: &str = "debate_room";
/// Sizes the position.
pub const RISK_MANAGER: &str = "risk_manager";
/// Makes the trading decision.
pub const PORTFOLIO_MANAGER: &str = "portfolio_manager";

const SIGNAL_REPLY: &str = r#"Reply with a single JSON object:
{"signal": "bullish" | "bearish" | "neutral", "confidence": 0.0, "details": {}, "reasoning": "..."}
Confidence is between 0 and 1."#;

const RESEARCH_REPLY: &str = r#"Reply with a single JSON object:
{"key_points": ["..."], "confidence": 0.0, "reasoning": "..."}
Confidence is between 0 and 1."#;

fn analyst_template(focus: &str) -> String {
    format!(
        "You are a {focus} analyst covering {{ticker}}.\n\
         Form a view on the stock from the market data below.\n\n\
         Market data:\n{{market_data}}\n\n{SIGNAL_REPLY}\n"
    )
}

fn researcher_template(side: &str) -> String {
    format!(
        "You are a {side} researcher covering {{ticker}}.\n\
         Build the strongest {side} case from the analyst signals.\n\n\
         Technical: {{technical}}\n\
         Fundamentals: {{fundamentals}}\n\
         Sentiment: {{sentiment}}\n\
         Valuation: {{valuation}}\n\n{RESEARCH_REPLY}\n"
    )
}

/// Built-in debate room prompt.
pub const DEBATE_TEMPLATE: &str = r#"You moderate an investment debate on {ticker}.
Weigh the bullish and bearish research and reach an overall view.

Bull case:
{bull_research}

Bear case:
{bear_research}

Reply with a single JSON object:
{"signal": "bullish" | "bearish" | "neutral", "confidence": 0.0, "details": {}, "reasoning": "..."}
"#;

/// Built-in risk manager prompt.
pub const RISK_TEMPLATE: &str = r#"You are the risk manager for a position in {ticker}.

Market data:
{market_data}

Debate outcome:
{debate}

Portfolio:
{portfolio}

Reply with a single JSON object:
{"risk_score": 0.0, "max_position_ratio": 0.0, "volatility": 0.0, "max_drawdown": 0.0, "reasoning": "..."}
Scores and ratios are between 0 and 1.
"#;

/// Built-in portfolio manager prompt.
pub const PORTFOLIO_TEMPLATE: &str = r#"You are the portfolio manager deciding on {ticker}.

Debate outcome:
{debate}

Risk assessment:
{risk}

Portfolio:
{portfolio}

Reply with a single JSON object:
{"action": "buy" | "sell" | "hold", "quantity": 0, "confidence": 0.0, "reasoning": "..."}
"#;

/// Analyst stages and the key their signal is bound to downstream.
const ANALYSTS: [(&str, &str); 4] = [
    (TECHNICAL_ANALYST, "technical"),
    (FUNDAMENTALS_ANALYST, "fundamentals"),
    (SENTIMENT_ANALYST, "sentiment"),
    (VALUATION_ANALYST, "valuation"),
];

/// Builds the investment pipeline with default options.
pub fn pipeline(llm: Arc<dyn LlmClient>, config: &AgentflowConfig) -> Result<Coordinator, AgentflowError> {
    pipeline_with(llm, config, &PipelineOptions::default())
}

/// Builds the investment pipeline.
pub fn pipeline_with(
    llm: Arc<dyn LlmClient>,
    config: &AgentflowConfig,
    options: &PipelineOptions,
) -> Result<Coordinator, AgentflowError> {
    let factory = AgentFactory::new(llm, config, options);
    let mut builder = factory.pipeline(PIPELINE);

    for (name, focus) in ANALYSTS {
        let agent = factory.agent(
            name,
            &analyst_template(focus),
            &["ticker", "market_data"],
            &[],
            AnalystSignal::default(),
        )?;
        builder = builder.stage(agent, &[])?;
    }

    let signal_bindings: Vec<(&str, &str)> = ANALYSTS.iter().map(|&(name, alias)| (alias, name)).collect();
    let signal_keys: Vec<&str> = ANALYSTS.iter().map(|&(_, alias)| alias).collect();
    let mut researcher_keys = vec!["ticker"];
    researcher_keys.extend(&signal_keys);

    for (name, side, stance) in [
        (BULL_RESEARCHER, "bullish", Signal::Bullish),
        (BEAR_RESEARCHER, "bearish", Signal::Bearish),
    ] {
        let agent = factory.agent(
            name,
            &researcher_template(side),
            &researcher_keys,
            &[],
            ResearchReport::with_stance(stance),
        )?;
        builder = builder.stage(agent, &signal_bindings)?;
    }

    let debate = factory.agent(
        DEBATE_ROOM,
        DEBATE_TEMPLATE,
        &["ticker", "bull_research", "bear_research"],
        &[],
        AnalystSignal::default(),
    )?;
    let risk = factory.agent(
        RISK_MANAGER,
        RISK_TEMPLATE,
        &["ticker", "market_data", "debate"],
        &["portfolio"],
        RiskAssessment::default(),
    )?;
    let decision = factory.agent(
        PORTFOLIO_MANAGER,
        PORTFOLIO_TEMPLATE,
        &["ticker", "debate", "risk"],
        &["portfolio"],
        TradingDecision::default(),
    )?;

    let coordinator = builder
        .stage(
            debate,
            &[("bull_research", BULL_RESEARCHER), ("bear_research", BEAR_RESEARCHER)],
        )?
        .stage(risk, &[("debate", DEBATE_ROOM)])?
        .stage(decision, &[("debate", DEBATE_ROOM), ("risk", RISK_MANAGER)])?
        .build()?;
    Ok(coordinator)
}

//! Testing utilities for agentflow pipelines.
//!
//! This module provides:
//! - A scripted LLM client and stage doubles
//! - Assertions over pipeline runs
//! - Canned inputs and clients for the ready-made pipelines

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_run_failed_at, assert_run_succeeded, assert_stage_completed, assert_stage_degraded,
    assert_stage_skipped, assert_stage_status,
};
pub use fixtures::{
    investment_client, investment_input, requirements_client, requirements_input, ANALYZER_PROMPT,
    CHECKER_PROMPT, EXTRACTOR_PROMPT, GENERATOR_PROMPT,
};
pub use mocks::{RecordingStage, ScriptedLlmClient, SlowStage};

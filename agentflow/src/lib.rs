//! # Agentflow
//!
//! Sequential multi-agent LLM pipelines that always produce an answer.
//!
//! Agentflow runs a fixed chain of LLM-backed stages, feeding each stage the
//! results of earlier ones, with support for:
//!
//! - **JSON recovery**: pull a JSON object out of prose, code fences or
//!   `<think>` blocks
//! - **Graceful degradation**: unparsable or failed answers fall back to
//!   typed per-stage defaults instead of aborting the run
//! - **Retry with backoff**: transient LLM errors are retried with jittered
//!   exponential backoff
//! - **Cancellation and deadlines**: a run stops promptly and records nothing
//!   from the stage in flight
//! - **Event-driven observability**: lifecycle events and structured logs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agentflow::prelude::*;
//!
//! let config = AgentflowConfig::from_file("agentflow.json")?.with_env_overrides()?;
//! let llm = Arc::new(OpenAiCompatibleClient::from_settings(&config.llm)?);
//! let pipeline = agents::requirements::pipeline(llm, &config)?;
//!
//! let run = pipeline.run_text("The system should support login").await;
//! println!("{}", run.to_json());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod agents;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod llm;
pub mod observability;
pub mod parser;
pub mod payloads;
pub mod pipeline;
pub mod retry;
pub mod stages;
pub mod template;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::agents::{self, PipelineOptions};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{AgentflowConfig, LlmSettings, PipelineSettings, StageOverrides};
    pub use crate::errors::{
        AgentflowError, LlmError, PipelineBuildError, RunFailure, RunFailureKind, StageError,
        TemplateError,
    };
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, WorkflowMetricsSink, WorkflowStats,
    };
    #[cfg(feature = "http")]
    pub use crate::llm::OpenAiCompatibleClient;
    pub use crate::llm::{Completion, CompletionConfig, LlmClient, Usage};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::parser::{parse_json_object, parse_or_empty, JsonMap};
    pub use crate::payloads::Payload;
    pub use crate::pipeline::{Coordinator, PipelineBuilder, PipelineRun};
    pub use crate::retry::RetryConfig;
    pub use crate::stages::{Stage, StageAgent, StageInput, StageResult, StageStatus};
    pub use crate::template::{PromptTemplate, TemplateSet};
    pub use std::sync::Arc;
}

//! Error types for the agentflow framework.
//!
//! The taxonomy separates what aborts a run from what only degrades a stage:
//!
//! - [`StageError`] is fatal for the run (bad input shape, a custom stage's own failure).
//! - [`LlmError`] is retried when transient and degrades the stage once exhausted.
//! - [`ParseFailure`] never leaves a stage; it selects the stage defaults.
//! - [`TemplateError`], [`ConfigError`] and [`PipelineBuildError`] surface at
//!   construction time, before any run starts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The umbrella error type for agentflow operations.
#[derive(Debug, Error)]
pub enum AgentflowError {
    /// A stage failed fatally.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// The LLM client failed.
    #[error("{0}")]
    Llm(#[from] LlmError),

    /// A prompt template was malformed or referenced unknown keys.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// Configuration could not be loaded or was invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A pipeline definition was inconsistent.
    #[error("{0}")]
    Build(#[from] PipelineBuildError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by an [`LlmClient`](crate::llm::LlmClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    /// The call did not finish within the configured timeout.
    #[error("LLM call timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The provider rejected the call because of rate limiting.
    #[error("LLM rate limit exceeded: {0}")]
    RateLimited(String),

    /// The connection to the provider failed.
    #[error("LLM connection failed: {0}")]
    Connection(String),

    /// The provider returned a server-side error.
    #[error("LLM server error ({status}): {message}")]
    Server {
        /// HTTP-like status code.
        status: u16,
        /// Provider message.
        message: String,
    },

    /// Credentials were rejected.
    #[error("LLM authentication failed: {0}")]
    Auth(String),

    /// The request itself was invalid.
    #[error("LLM rejected request: {0}")]
    InvalidRequest(String),

    /// The provider answered with a body that could not be decoded.
    #[error("LLM response could not be decoded: {0}")]
    Decode(String),
}

impl LlmError {
    /// Returns true for errors worth retrying (timeout, rate limit, network, 5xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited(_) | Self::Connection(_) | Self::Server { .. }
        )
    }

    /// Returns a short machine-readable kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::Connection(_) => "connection",
            Self::Server { .. } => "server",
            Self::Auth(_) => "auth",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Decode(_) => "decode",
        }
    }
}

/// Non-fatal failure to obtain a JSON object from LLM text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No JSON object found in LLM response ({reason}); tried: {}", .strategies_tried.join(", "))]
pub struct ParseFailure {
    /// Why the last strategy gave up.
    pub reason: String,
    /// Names of the strategies that were attempted, in order.
    pub strategies_tried: Vec<&'static str>,
}

impl ParseFailure {
    /// Creates a new parse failure.
    #[must_use]
    pub fn new(reason: impl Into<String>, strategies_tried: Vec<&'static str>) -> Self {
        Self {
            reason: reason.into(),
            strategies_tried,
        }
    }
}

/// Fatal stage errors that abort the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The stage input did not satisfy the stage preconditions.
    #[error("Invalid input for stage '{stage}': missing or empty {}", .missing.join(", "))]
    InvalidInput {
        /// The stage that rejected its input.
        stage: String,
        /// The required keys that were absent or empty.
        missing: Vec<String>,
    },

    /// A stage failed for a reason of its own.
    #[error("Stage '{stage}' failed: {message}")]
    Internal {
        /// The failing stage.
        stage: String,
        /// Description of the failure.
        message: String,
    },
}

impl StageError {
    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(stage: impl Into<String>, missing: Vec<String>) -> Self {
        Self::InvalidInput {
            stage: stage.into(),
            missing,
        }
    }

    /// Creates an internal stage error.
    #[must_use]
    pub fn internal(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Returns the name of the stage that raised the error.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::InvalidInput { stage, .. } | Self::Internal { stage, .. } => stage,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        match self {
            Self::InvalidInput { stage, missing } => {
                map.insert("type".to_string(), serde_json::json!("InvalidInputError"));
                map.insert("stage".to_string(), serde_json::json!(stage));
                map.insert("missing".to_string(), serde_json::json!(missing));
            }
            Self::Internal { stage, .. } => {
                map.insert("type".to_string(), serde_json::json!("StageError"));
                map.insert("stage".to_string(), serde_json::json!(stage));
            }
        }
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors in prompt templates, detected when a stage is configured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template references placeholders the stage never provides.
    #[error("Template '{template}' references unknown placeholders: {}", .unknown.join(", "))]
    UnknownPlaceholders {
        /// The template name.
        template: String,
        /// The offending placeholders.
        unknown: Vec<String>,
    },

    /// A placeholder was opened and never closed.
    #[error("Template '{template}' has an unterminated placeholder at byte {offset}")]
    Unterminated {
        /// The template name.
        template: String,
        /// Byte offset of the opening brace.
        offset: usize,
    },

    /// A template file could not be read.
    #[error("Template '{template}' could not be loaded: {message}")]
    Load {
        /// The template name.
        template: String,
        /// The underlying error.
        message: String,
    },
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration source could not be read, parsed or merged.
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    /// A value was out of range.
    #[error("Invalid config value for '{field}': {message}")]
    Invalid {
        /// The offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while assembling a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineBuildError {
    /// The pipeline has no stages.
    #[error("Pipeline '{pipeline}' has no stages")]
    Empty {
        /// The pipeline name.
        pipeline: String,
    },

    /// Two stages share a name.
    #[error("Pipeline '{pipeline}' declares stage '{stage}' more than once")]
    DuplicateStage {
        /// The pipeline name.
        pipeline: String,
        /// The duplicated stage.
        stage: String,
    },

    /// A binding refers to a stage that does not run earlier.
    #[error("Stage '{stage}' binds '{alias}' to '{source_stage}', which does not run before it")]
    UnknownBinding {
        /// The stage declaring the binding.
        stage: String,
        /// The input key the binding fills.
        alias: String,
        /// The referenced stage.
        source_stage: String,
    },
}

/// Classification of a run-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunFailureKind {
    /// A stage rejected its input.
    InvalidInput,
    /// A stage failed on its own.
    Internal,
    /// The run was cancelled by the caller.
    Cancelled,
    /// The overall run deadline elapsed.
    DeadlineExceeded,
}

impl std::fmt::Display for RunFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::Internal => write!(f, "internal"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline_exceeded"),
        }
    }
}

/// The failure recorded on an unsuccessful [`PipelineRun`](crate::pipeline::PipelineRun).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// What went wrong.
    pub kind: RunFailureKind,
    /// The stage that was executing.
    pub stage: String,
    /// Human-readable message naming the stage.
    pub message: String,
}

impl RunFailure {
    /// Creates a run failure.
    #[must_use]
    pub fn new(kind: RunFailureKind, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Builds a run failure from a fatal stage error.
    #[must_use]
    pub fn from_stage_error(err: &StageError) -> Self {
        let kind = match err {
            StageError::InvalidInput { .. } => RunFailureKind::InvalidInput,
            StageError::Internal { .. } => RunFailureKind::Internal,
        };
        Self::new(kind, err.stage(), err.to_string())
    }
}

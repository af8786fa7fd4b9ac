//! Stage result types.

use crate::llm::Usage;
use crate::payloads::{Payload, StagePayload};
use serde::Serialize;

/// How a stage finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// The payload came from the model.
    Completed,
    /// The payload is the stage's defaults.
    Degraded,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Why a stage fell back to its defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum Degradation {
    /// Every attempt to call the model failed.
    LlmFailed {
        /// Error kind of the last failure.
        error_kind: String,
        /// Message of the last failure.
        message: String,
    },
    /// The model answered but no usable object could be extracted.
    Unparsable {
        /// Parser diagnostics.
        message: String,
    },
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LlmFailed { error_kind, message } => write!(f, "LLM call failed ({error_kind}): {message}"),
            Self::Unparsable { message } => write!(f, "Response unparsable: {message}"),
        }
    }
}

/// Result produced by a stage.
///
/// `payload` is always schema-conformant, even when `status` is
/// [`StageStatus::Degraded`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    /// Stage name.
    pub stage: String,
    /// The typed payload.
    pub payload: StagePayload,
    /// Completed or degraded.
    pub status: StageStatus,
    /// Set when degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degradation: Option<Degradation>,
    /// Fields that hold default values.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub defaulted_fields: Vec<String>,
    /// LLM calls made, including the first.
    pub attempts: usize,
    /// LLM calls made after the first.
    pub retries: usize,
    /// Tokens consumed across all attempts.
    pub usage: Usage,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl StageResult {
    /// Creates a completed result.
    #[must_use]
    pub fn completed(stage: impl Into<String>, payload: impl Payload) -> Self {
        Self {
            stage: stage.into(),
            payload: payload.into_stage_payload(),
            status: StageStatus::Completed,
            degradation: None,
            defaulted_fields: Vec::new(),
            attempts: 0,
            retries: 0,
            usage: Usage::default(),
            duration_ms: 0,
        }
    }

    /// Creates a degraded result carrying default values.
    #[must_use]
    pub fn degraded(stage: impl Into<String>, defaults: impl Payload, degradation: Degradation) -> Self {
        Self {
            status: StageStatus::Degraded,
            degradation: Some(degradation),
            ..Self::completed(stage, defaults)
        }
    }

    /// Sets the attempt count; retries are derived from it.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self.retries = attempts.saturating_sub(1);
        self
    }

    /// Sets the token usage.
    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Sets the duration.
    #[must_use]
    pub const fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Sets the defaulted fields.
    #[must_use]
    pub fn with_defaulted_fields(mut self, fields: Vec<String>) -> Self {
        self.defaulted_fields = fields;
        self
    }

    /// Returns true if the stage fell back to its defaults.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.status == StageStatus::Degraded
    }

    /// Borrows the payload as `P`.
    #[must_use]
    pub fn payload_as<P: Payload>(&self) -> Option<&P> {
        self.payload.downcast::<P>()
    }
}

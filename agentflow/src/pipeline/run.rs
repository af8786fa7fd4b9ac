//! The record of one pipeline run.

use crate::errors::{RunFailure, RunFailureKind};
use crate::payloads::{Payload, StagePayload};
use crate::stages::{StageResult, StageStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Timing and retry figures for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageMetrics {
    /// Stage name.
    pub stage: String,
    /// Final status.
    pub status: StageStatus,
    /// LLM calls made.
    pub attempts: usize,
    /// LLM calls after the first.
    pub retries: usize,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Tokens consumed.
    pub tokens: u32,
}

impl From<&StageResult> for StageMetrics {
    fn from(result: &StageResult) -> Self {
        Self {
            stage: result.stage.clone(),
            status: result.status,
            attempts: result.attempts,
            retries: result.retries,
            duration_ms: result.duration_ms,
            tokens: result.usage.total_tokens(),
        }
    }
}

/// Aggregate figures for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunMetrics {
    /// Wall-clock time of the whole run in milliseconds.
    pub elapsed_ms: u64,
    /// Per-stage figures, in execution order.
    pub stages: Vec<StageMetrics>,
    /// Tokens consumed by all stages.
    pub total_tokens: u64,
    /// Retries across all stages.
    pub total_retries: usize,
    /// Stages that fell back to defaults.
    pub degraded_stages: Vec<String>,
}

/// Result of one [`Coordinator`](super::Coordinator) run.
///
/// Owned by the caller once returned; nothing is shared with other runs.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// False if a stage failed fatally, the deadline passed, or the run was
    /// cancelled. Degraded stages do not clear it.
    pub success: bool,
    /// The stage that was executing when the run failed.
    pub failed_stage: Option<String>,
    /// Why the run failed.
    pub error: Option<RunFailure>,
    /// Results of the stages that finished, in execution order.
    pub stages: Vec<StageResult>,
    /// Aggregate figures.
    pub metrics: RunMetrics,
}

impl PipelineRun {
    pub(crate) fn new(run_id: Uuid, pipeline: impl Into<String>) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            started_at: Utc::now(),
            success: true,
            failed_stage: None,
            error: None,
            stages: Vec::new(),
            metrics: RunMetrics::default(),
        }
    }

    pub(crate) fn record(&mut self, result: StageResult) {
        self.metrics.stages.push(StageMetrics::from(&result));
        self.metrics.total_tokens += u64::from(result.usage.total_tokens());
        self.metrics.total_retries += result.retries;
        if result.is_degraded() {
            self.metrics.degraded_stages.push(result.stage.clone());
        }
        self.stages.push(result);
    }

    pub(crate) fn fail(&mut self, failure: RunFailure) {
        self.success = false;
        self.failed_stage = Some(failure.stage.clone());
        self.error = Some(failure);
    }

    pub(crate) fn finish(&mut self, elapsed_ms: u64) {
        self.metrics.elapsed_ms = elapsed_ms;
    }

    /// Looks up a stage result by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Looks up a stage payload by name.
    #[must_use]
    pub fn payload(&self, name: &str) -> Option<&StagePayload> {
        self.stage(name).map(|s| &s.payload)
    }

    /// Looks up a stage payload by name as `P`.
    #[must_use]
    pub fn payload_as<P: Payload>(&self, name: &str) -> Option<&P> {
        self.payload(name).and_then(StagePayload::downcast::<P>)
    }

    /// Names of the stages that finished, in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage.as_str()).collect()
    }

    /// Stage payloads keyed by stage name.
    ///
    /// Excludes timing, so two runs over the same input with a deterministic
    /// client compare equal.
    #[must_use]
    pub fn payloads(&self) -> Map<String, Value> {
        self.stages
            .iter()
            .map(|s| (s.stage.clone(), s.payload.to_value()))
            .collect()
    }

    /// Human-readable failure message, if the run failed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// Returns true if the run was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == RunFailureKind::Cancelled)
    }

    /// The caller-facing aggregate.
    ///
    /// `{run_id, pipeline, success, failed_stage, error, stages: {name: payload}, metrics}`
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "run_id": self.run_id.to_string(),
            "pipeline": self.pipeline,
            "success": self.success,
            "failed_stage": self.failed_stage,
            "error": self.error_message(),
            "stages": self.payloads(),
            "metrics": self.metrics,
        })
    }
}

//! Lifecycle events emitted while a pipeline runs.
//!
//! The coordinator and stage agents report progress through an
//! [`EventSink`] supplied at construction; there is no global sink.

mod metrics;
mod sink;

pub use metrics::{WorkflowMetricsSink, WorkflowStats};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run started.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// A run finished successfully (possibly with degraded stages).
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A run aborted on a fatal stage error or deadline.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// A run was cancelled by the caller.
pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
/// A stage started.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage is about to retry its LLM call.
pub const STAGE_RETRY: &str = "stage.retry";
/// A stage produced a payload from the model.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage fell back to its defaults.
pub const STAGE_DEGRADED: &str = "stage.degraded";
/// A stage failed fatally.
pub const STAGE_FAILED: &str = "stage.failed";

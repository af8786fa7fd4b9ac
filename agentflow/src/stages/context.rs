//! Per-run context handed to each stage.

use crate::events::{EventSink, NoOpEventSink};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Identifies the run a stage executes in and carries its event sink.
#[derive(Clone)]
pub struct StageContext {
    run_id: Uuid,
    pipeline: String,
    sink: Arc<dyn EventSink>,
    emit_events: bool,
}

impl StageContext {
    /// Creates a context for one run.
    #[must_use]
    pub fn new(run_id: Uuid, pipeline: impl Into<String>, sink: Arc<dyn EventSink>, emit_events: bool) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            sink,
            emit_events,
        }
    }

    /// A context for running a stage outside any pipeline.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(Uuid::new_v4(), "detached", Arc::new(NoOpEventSink), false)
    }

    /// The run identifier.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Emits an event tagged with the run id, if events are enabled.
    pub async fn emit(&self, event_type: &str, mut data: Value) {
        if !self.emit_events {
            return;
        }
        if let Value::Object(ref mut map) = data {
            map.insert("run_id".to_string(), Value::String(self.run_id.to_string()));
            map.insert("pipeline".to_string(), Value::String(self.pipeline.clone()));
        }
        self.sink.emit(event_type, Some(data)).await;
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("run_id", &self.run_id)
            .field("pipeline", &self.pipeline)
            .field("emit_events", &self.emit_events)
            .finish_non_exhaustive()
    }
}

//! Cross-run workflow statistics built from terminal pipeline events.

use super::{EventSink, PIPELINE_CANCELLED, PIPELINE_COMPLETED, PIPELINE_FAILED};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Aggregated outcome of every run seen by a [`WorkflowMetricsSink`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowStats {
    /// Runs that reached a terminal event.
    pub total_runs: u64,
    /// Runs reported successful (degraded stages included).
    pub successful_runs: u64,
    /// Runs that failed or were cancelled.
    pub failed_runs: u64,
    /// Of `failed_runs`, those cancelled by the caller.
    pub cancelled_runs: u64,
    /// `successful_runs / total_runs`, or 0 before the first run.
    pub success_rate: f64,
    /// Mean wall-clock time per run.
    pub average_elapsed_ms: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    runs: u64,
    successful: u64,
    cancelled: u64,
    elapsed_ms: u64,
}

impl Totals {
    fn record(&mut self, outcome: &str, elapsed_ms: u64) {
        self.runs += 1;
        self.elapsed_ms += elapsed_ms;
        match outcome {
            PIPELINE_COMPLETED => self.successful += 1,
            PIPELINE_CANCELLED => self.cancelled += 1,
            _ => {}
        }
    }

    fn add(&mut self, other: &Self) {
        self.runs += other.runs;
        self.successful += other.successful;
        self.cancelled += other.cancelled;
        self.elapsed_ms += other.elapsed_ms;
    }

    #[allow(clippy::cast_precision_loss)]
    fn stats(&self) -> WorkflowStats {
        if self.runs == 0 {
            return WorkflowStats::default();
        }
        WorkflowStats {
            total_runs: self.runs,
            successful_runs: self.successful,
            failed_runs: self.runs - self.successful,
            cancelled_runs: self.cancelled,
            success_rate: self.successful as f64 / self.runs as f64,
            average_elapsed_ms: self.elapsed_ms as f64 / self.runs as f64,
        }
    }
}

/// An [`EventSink`] counting run outcomes per pipeline.
///
/// Share one instance across runs (and pipelines) to get workflow-level
/// success rate and average run time. Events are optionally forwarded to
/// another sink unchanged. Nothing is counted for pipelines built with
/// `emit_events` disabled.
#[derive(Default)]
pub struct WorkflowMetricsSink {
    totals: RwLock<BTreeMap<String, Totals>>,
    forward: Option<Arc<dyn EventSink>>,
}

impl WorkflowMetricsSink {
    /// Creates an empty metrics sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwards every event to `sink` after counting it.
    #[must_use]
    pub fn forwarding_to(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.forward = Some(sink);
        self
    }

    /// Statistics over every pipeline.
    #[must_use]
    pub fn stats(&self) -> WorkflowStats {
        let mut all = Totals::default();
        for totals in self.totals.read().values() {
            all.add(totals);
        }
        all.stats()
    }

    /// Statistics for one pipeline, if it has finished a run.
    #[must_use]
    pub fn stats_for(&self, pipeline: &str) -> Option<WorkflowStats> {
        self.totals.read().get(pipeline).map(Totals::stats)
    }

    /// Forgets everything counted so far.
    pub fn reset(&self) {
        self.totals.write().clear();
    }

    fn observe(&self, event_type: &str, data: Option<&Value>) {
        if !matches!(event_type, PIPELINE_COMPLETED | PIPELINE_FAILED | PIPELINE_CANCELLED) {
            return;
        }
        let pipeline = data
            .and_then(|d| d.get("pipeline"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let elapsed_ms = data
            .and_then(|d| d.get("elapsed_ms"))
            .and_then(Value::as_u64)
            .unwrap_or_default();
        self.totals
            .write()
            .entry(pipeline)
            .or_default()
            .record(event_type, elapsed_ms);
    }
}

impl std::fmt::Debug for WorkflowMetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowMetricsSink")
            .field("stats", &self.stats())
            .field("forwarding", &self.forward.is_some())
            .finish()
    }
}

#[async_trait]
impl EventSink for WorkflowMetricsSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.observe(event_type, data.as_ref());
        if let Some(ref sink) = self.forward {
            sink.emit(event_type, data).await;
        }
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.observe(event_type, data.as_ref());
        if let Some(ref sink) = self.forward {
            sink.try_emit(event_type, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingEventSink, STAGE_STARTED};
    use serde_json::json;

    #[tokio::test]
    async fn test_counts_terminal_events_only() {
        let sink = WorkflowMetricsSink::new();
        sink.emit(STAGE_STARTED, Some(json!({"pipeline": "p"}))).await;
        assert_eq!(sink.stats(), WorkflowStats::default());

        sink.emit(PIPELINE_COMPLETED, Some(json!({"pipeline": "p", "elapsed_ms": 100})))
            .await;
        sink.emit(PIPELINE_COMPLETED, Some(json!({"pipeline": "p", "elapsed_ms": 300})))
            .await;
        sink.emit(PIPELINE_FAILED, Some(json!({"pipeline": "p", "elapsed_ms": 200})))
            .await;
        sink.try_emit(PIPELINE_CANCELLED, Some(json!({"pipeline": "q", "elapsed_ms": 400})));

        let all = sink.stats();
        assert_eq!(all.total_runs, 4);
        assert_eq!(all.successful_runs, 2);
        assert_eq!(all.failed_runs, 2);
        assert_eq!(all.cancelled_runs, 1);
        assert!((all.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((all.average_elapsed_ms - 250.0).abs() < f64::EPSILON);

        let p = sink.stats_for("p").unwrap();
        assert_eq!(p.total_runs, 3);
        assert!((p.average_elapsed_ms - 200.0).abs() < f64::EPSILON);
        assert!(sink.stats_for("missing").is_none());

        sink.reset();
        assert_eq!(sink.stats().total_runs, 0);
    }

    #[tokio::test]
    async fn test_forwards_events() {
        let collected = Arc::new(CollectingEventSink::new());
        let sink = WorkflowMetricsSink::new().forwarding_to(collected.clone());

        sink.emit(STAGE_STARTED, None).await;
        sink.try_emit(PIPELINE_COMPLETED, Some(json!({"pipeline": "p"})));

        assert_eq!(collected.event_types(), vec![STAGE_STARTED, PIPELINE_COMPLETED]);
        assert_eq!(sink.stats().successful_runs, 1);
    }
}

//! Sequential stage coordinator.

use super::builder::{PipelineBuilder, StageSpec};
use super::run::PipelineRun;
use crate::cancellation::CancellationToken;
use crate::config::PipelineSettings;
use crate::errors::{RunFailure, RunFailureKind};
use crate::events::{
    EventSink, PIPELINE_CANCELLED, PIPELINE_COMPLETED, PIPELINE_FAILED, PIPELINE_STARTED, STAGE_COMPLETED,
    STAGE_DEGRADED, STAGE_FAILED, STAGE_STARTED,
};
use crate::observability::SpanTimer;
use crate::stages::{StageContext, StageInput, StageResult};
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How a single stage step ended.
enum StepOutcome {
    Finished(StageResult),
    Failed(RunFailure),
}

/// Runs a fixed sequence of stages and aggregates their results.
///
/// A coordinator holds no per-run state, so one instance can serve
/// concurrent runs from behind an `Arc`.
pub struct Coordinator {
    name: String,
    stages: Vec<StageSpec>,
    sink: Arc<dyn EventSink>,
    settings: PipelineSettings,
}

impl Coordinator {
    /// Starts building a coordinator.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub(crate) fn from_parts(
        name: String,
        stages: Vec<StageSpec>,
        sink: Arc<dyn EventSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            name,
            stages,
            sink,
            settings,
        }
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(StageSpec::name).collect()
    }

    /// Run-wide settings.
    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs the pipeline over free-form text, passed as `{"text": ...}`.
    pub async fn run_text(&self, text: &str) -> PipelineRun {
        self.run(StageInput::from_text(text)).await
    }

    /// Runs the pipeline to completion.
    ///
    /// Never fails: fatal stage errors and deadline expiry are reported on
    /// the returned [`PipelineRun`].
    pub async fn run(&self, input: StageInput) -> PipelineRun {
        self.execute(input, None).await
    }

    /// Runs the pipeline, stopping as soon as `token` is cancelled.
    ///
    /// The stage in flight when the token fires is dropped and nothing from
    /// it is recorded.
    pub async fn run_with_cancellation(&self, input: StageInput, token: &CancellationToken) -> PipelineRun {
        self.execute(input, Some(token)).await
    }

    /// Runs the pipeline once per input, concurrently, returning runs in
    /// input order.
    ///
    /// Runs share only the LLM client; stages within each run stay
    /// sequential.
    pub async fn run_many<I>(&self, inputs: I) -> Vec<PipelineRun>
    where
        I: IntoIterator<Item = StageInput>,
    {
        join_all(inputs.into_iter().map(|input| self.run(input))).await
    }

    async fn execute(&self, input: StageInput, token: Option<&CancellationToken>) -> PipelineRun {
        let run_id = Uuid::now_v7();
        let ctx = StageContext::new(run_id, self.name.clone(), self.sink.clone(), self.settings.emit_events);
        let timer = SpanTimer::start(self.name.clone());
        let deadline = self.settings.deadline().map(|d| Instant::now() + d);
        let mut run = PipelineRun::new(run_id, self.name.clone());

        info!(
            run_id = %run_id,
            pipeline = %self.name,
            stages = self.stages.len(),
            "Pipeline started"
        );
        ctx.emit(
            PIPELINE_STARTED,
            json!({
                "stages": self.stage_names(),
                "input_keys": input.keys().collect::<Vec<_>>(),
            }),
        )
        .await;

        for spec in &self.stages {
            let stage_input = Self::stage_input(&input, spec, &run);
            match self.step(spec, &stage_input, &ctx, token, deadline).await {
                StepOutcome::Finished(result) => {
                    run.record(result);
                }
                StepOutcome::Failed(failure) => {
                    run.fail(failure);
                    break;
                }
            }
        }

        run.finish(timer.finish());
        self.report(&ctx, &run).await;
        run
    }

    /// Initial keys plus the payloads this stage is bound to.
    fn stage_input(initial: &StageInput, spec: &StageSpec, run: &PipelineRun) -> StageInput {
        let mut input = initial.clone();
        for binding in &spec.bindings {
            let value = run.payload(&binding.source).map_or(Value::Null, |p| p.to_value());
            input.bind(binding.alias.clone(), value);
        }
        input
    }

    async fn step(
        &self,
        spec: &StageSpec,
        input: &StageInput,
        ctx: &StageContext,
        token: Option<&CancellationToken>,
        deadline: Option<Instant>,
    ) -> StepOutcome {
        let stage = spec.name();

        if let Some(token) = token.filter(|t| t.is_cancelled()) {
            return StepOutcome::Failed(cancelled(stage, token));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return StepOutcome::Failed(self.deadline_exceeded(stage));
        }

        ctx.emit(STAGE_STARTED, json!({"stage": stage})).await;
        let timer = SpanTimer::start(stage.to_string());

        let cancelled_fut = async {
            match token {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let deadline_fut = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            () = cancelled_fut => {
                warn!(stage = %stage, run_id = %ctx.run_id(), "Stage cancelled");
                StepOutcome::Failed(token.map_or_else(
                    || RunFailure::new(RunFailureKind::Cancelled, stage, "cancelled"),
                    |token| cancelled(stage, token),
                ))
            }
            () = deadline_fut => StepOutcome::Failed(self.deadline_exceeded(stage)),
            result = spec.runner.execute(input, ctx) => match result {
                Ok(result) => StepOutcome::Finished(result),
                Err(err) => StepOutcome::Failed(RunFailure {
                    stage: stage.to_string(),
                    ..RunFailure::from_stage_error(&err)
                }),
            },
        };

        let duration_ms = timer.finish();
        match &outcome {
            StepOutcome::Finished(result) if result.is_degraded() => {
                ctx.emit(
                    STAGE_DEGRADED,
                    json!({
                        "stage": stage,
                        "duration_ms": duration_ms,
                        "reason": result.degradation.as_ref().map(ToString::to_string),
                        "attempts": result.attempts,
                    }),
                )
                .await;
            }
            StepOutcome::Finished(result) => {
                ctx.emit(
                    STAGE_COMPLETED,
                    json!({
                        "stage": stage,
                        "duration_ms": duration_ms,
                        "attempts": result.attempts,
                    }),
                )
                .await;
            }
            StepOutcome::Failed(failure) => {
                ctx.emit(
                    STAGE_FAILED,
                    json!({
                        "stage": stage,
                        "duration_ms": duration_ms,
                        "kind": failure.kind,
                        "error": failure.message,
                    }),
                )
                .await;
            }
        }
        outcome
    }

    fn deadline_exceeded(&self, stage: &str) -> RunFailure {
        let budget = self.settings.deadline_ms.unwrap_or_default();
        RunFailure::new(
            RunFailureKind::DeadlineExceeded,
            stage,
            format!("pipeline deadline of {budget}ms exceeded"),
        )
    }

    async fn report(&self, ctx: &StageContext, run: &PipelineRun) {
        let metrics = json!({
            "elapsed_ms": run.metrics.elapsed_ms,
            "total_tokens": run.metrics.total_tokens,
            "degraded_stages": run.metrics.degraded_stages,
        });

        match &run.error {
            None => {
                info!(
                    run_id = %run.run_id,
                    pipeline = %self.name,
                    elapsed_ms = run.metrics.elapsed_ms,
                    degraded = run.metrics.degraded_stages.len(),
                    "Pipeline completed"
                );
                ctx.emit(PIPELINE_COMPLETED, metrics).await;
            }
            Some(failure) if failure.kind == RunFailureKind::Cancelled => {
                warn!(
                    run_id = %run.run_id,
                    pipeline = %self.name,
                    stage = %failure.stage,
                    "Pipeline cancelled"
                );
                ctx.emit(
                    PIPELINE_CANCELLED,
                    json!({
                        "stage": failure.stage,
                        "reason": failure.message,
                        "elapsed_ms": run.metrics.elapsed_ms,
                    }),
                )
                .await;
            }
            Some(failure) => {
                error!(
                    run_id = %run.run_id,
                    pipeline = %self.name,
                    stage = %failure.stage,
                    kind = %failure.kind,
                    error = %failure.message,
                    "Pipeline failed"
                );
                ctx.emit(
                    PIPELINE_FAILED,
                    json!({
                        "stage": failure.stage,
                        "kind": failure.kind,
                        "error": failure.message,
                        "elapsed_ms": run.metrics.elapsed_ms,
                        "metrics": metrics,
                    }),
                )
                .await;
            }
        }
    }
}

fn cancelled(stage: &str, token: &CancellationToken) -> RunFailure {
    RunFailure::new(
        RunFailureKind::Cancelled,
        stage,
        token.reason().unwrap_or_else(|| "cancelled".to_string()),
    )
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

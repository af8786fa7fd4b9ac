//! Test assertions for pipeline runs.

use crate::pipeline::PipelineRun;
use crate::stages::StageStatus;

/// Asserts that the run succeeded.
pub fn assert_run_succeeded(run: &PipelineRun) {
    assert!(
        run.success,
        "Expected run '{}' to succeed, failed at {:?}: {:?}",
        run.pipeline,
        run.failed_stage,
        run.error_message()
    );
}

/// Asserts that the run failed at `stage`.
pub fn assert_run_failed_at(run: &PipelineRun, stage: &str) {
    assert!(!run.success, "Expected run '{}' to fail at '{stage}', but it succeeded", run.pipeline);
    assert_eq!(
        run.failed_stage.as_deref(),
        Some(stage),
        "Expected failure at '{stage}', got {:?}",
        run.failed_stage
    );
}

/// Asserts that `stage` finished with `expected` status.
pub fn assert_stage_status(run: &PipelineRun, stage: &str, expected: StageStatus) {
    let result = run
        .stage(stage)
        .unwrap_or_else(|| panic!("Stage '{stage}' did not run. Ran: {:?}", run.stage_names()));
    assert_eq!(
        result.status, expected,
        "Expected stage '{stage}' to be {expected}, got {} ({:?})",
        result.status, result.degradation
    );
}

/// Asserts that `stage` completed without falling back to defaults.
pub fn assert_stage_completed(run: &PipelineRun, stage: &str) {
    assert_stage_status(run, stage, StageStatus::Completed);
}

/// Asserts that `stage` fell back to its defaults.
pub fn assert_stage_degraded(run: &PipelineRun, stage: &str) {
    assert_stage_status(run, stage, StageStatus::Degraded);
}

/// Asserts that `stage` did not run.
pub fn assert_stage_skipped(run: &PipelineRun, stage: &str) {
    assert!(
        run.stage(stage).is_none(),
        "Expected stage '{stage}' not to run. Ran: {:?}",
        run.stage_names()
    );
}

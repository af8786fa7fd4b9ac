//! Pipeline building and execution.
//!
//! This module provides:
//! - A builder that validates stage names and input bindings
//! - The [`Coordinator`], which runs stages strictly in order
//! - [`PipelineRun`], the per-run record with metrics

mod builder;
mod coordinator;
mod run;

pub use builder::{Binding, PipelineBuilder, StageSpec};
pub use coordinator::Coordinator;
pub use run::{PipelineRun, RunMetrics, StageMetrics};

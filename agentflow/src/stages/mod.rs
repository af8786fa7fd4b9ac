//! Stage trait and implementations.
//!
//! Stages are the units a pipeline sequences. [`StageAgent`] is the
//! LLM-backed stage; [`FnStage`] wraps a plain function for deterministic
//! steps.

mod agent;
mod context;
mod input;
mod result;

pub use agent::{prompt_fingerprint, StageAgent, StageAgentBuilder};
pub use context::StageContext;
pub use input::StageInput;
pub use result::{Degradation, StageResult, StageStatus};

use crate::errors::StageError;
use crate::payloads::StagePayload;
use async_trait::async_trait;
use std::fmt::Debug;

/// A named unit of a pipeline.
///
/// `execute` returns `Err` only for failures that must abort the run. A
/// stage that cannot get a good answer returns a degraded result instead.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `input` - The stage input
    /// * `ctx` - The run the stage executes in
    async fn execute(&self, input: &StageInput, ctx: &StageContext) -> Result<StageResult, StageError>;
}

/// A stage backed by a synchronous function.
pub struct FnStage<F>
where
    F: Fn(&StageInput) -> Result<StagePayload, StageError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageInput) -> Result<StagePayload, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageInput) -> Result<StagePayload, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageInput) -> Result<StagePayload, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StageInput, _ctx: &StageContext) -> Result<StageResult, StageError> {
        let timer = crate::observability::SpanTimer::start(self.name.clone());
        let payload = (self.func)(input)?;
        Ok(StageResult {
            payload,
            ..StageResult::completed(self.name.clone(), crate::parser::JsonMap::new())
        }
        .with_duration_ms(timer.finish()))
    }
}

//! Pipeline builder with validation.

use super::Coordinator;
use crate::config::PipelineSettings;
use crate::errors::PipelineBuildError;
use crate::events::{EventSink, NoOpEventSink};
use crate::stages::Stage;
use std::sync::Arc;

/// An input binding: the payload of `source` is passed to a later stage
/// under the key `alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Input key the payload is stored under.
    pub alias: String,
    /// Stage whose payload is bound.
    pub source: String,
}

/// A stage together with the bindings that feed it.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The stage runner.
    pub runner: Arc<dyn Stage>,
    /// Bindings from earlier stages.
    pub bindings: Vec<Binding>,
}

impl StageSpec {
    /// The stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.runner.name()
    }
}

/// Builder for a [`Coordinator`].
///
/// Stages run in the order they are added. Each stage is checked as it is
/// added, so bindings can only refer to stages added before it.
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageSpec>,
    sink: Arc<dyn EventSink>,
    settings: PipelineSettings,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            sink: Arc::new(NoOpEventSink),
            settings: PipelineSettings::default(),
        }
    }

    /// Appends a stage.
    ///
    /// `bindings` are `(alias, source_stage)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage name is taken or a binding refers to a
    /// stage that was not added earlier.
    pub fn stage(mut self, runner: Arc<dyn Stage>, bindings: &[(&str, &str)]) -> Result<Self, PipelineBuildError> {
        let name = runner.name().to_string();
        if self.stages.iter().any(|s| s.name() == name) {
            return Err(PipelineBuildError::DuplicateStage {
                pipeline: self.name,
                stage: name,
            });
        }

        let mut resolved = Vec::with_capacity(bindings.len());
        for &(alias, source) in bindings {
            if !self.stages.iter().any(|s| s.name() == source) {
                return Err(PipelineBuildError::UnknownBinding {
                    stage: name,
                    alias: alias.to_string(),
                    source_stage: source.to_string(),
                });
            }
            resolved.push(Binding {
                alias: alias.to_string(),
                source: source.to_string(),
            });
        }

        self.stages.push(StageSpec {
            runner,
            bindings: resolved,
        });
        Ok(self)
    }

    /// Sets the event sink. Defaults to [`NoOpEventSink`].
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets run-wide settings such as the deadline.
    #[must_use]
    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the stage names added so far, in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(StageSpec::name).collect()
    }

    /// Finishes the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if no stage was added.
    pub fn build(self) -> Result<Coordinator, PipelineBuildError> {
        if self.stages.is_empty() {
            return Err(PipelineBuildError::Empty { pipeline: self.name });
        }
        Ok(Coordinator::from_parts(self.name, self.stages, self.sink, self.settings))
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

//! Ready-made pipelines.
//!
//! - [`requirements`]: extract, analyze, check and document software
//!   requirements from free-form text.
//! - [`investment`]: analyst signals, bull/bear research, debate, risk and a
//!   final trading decision for one ticker.

pub mod investment;
pub mod requirements;

use crate::config::AgentflowConfig;
use crate::errors::AgentflowError;
use crate::events::EventSink;
use crate::llm::LlmClient;
use crate::payloads::Payload;
use crate::pipeline::PipelineBuilder;
use crate::stages::{Stage, StageAgent};
use crate::template::TemplateSet;
use std::sync::Arc;

/// Optional wiring for the ready-made pipelines.
#[derive(Clone, Default)]
pub struct PipelineOptions {
    sink: Option<Arc<dyn EventSink>>,
    templates: Option<TemplateSet>,
}

impl PipelineOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends pipeline events to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Uses templates from `templates` where present.
    ///
    /// Lookup order for a stage template is the config override, then this
    /// set, then the built-in prompt.
    #[must_use]
    pub fn with_templates(mut self, templates: TemplateSet) -> Self {
        self.templates = Some(templates);
        self
    }
}

impl std::fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("has_sink", &self.sink.is_some())
            .field("templates", &self.templates)
            .finish()
    }
}

/// Builds the stage agents of one pipeline from a shared client and config.
pub(crate) struct AgentFactory<'a> {
    llm: Arc<dyn LlmClient>,
    config: &'a AgentflowConfig,
    options: &'a PipelineOptions,
}

impl<'a> AgentFactory<'a> {
    pub(crate) fn new(llm: Arc<dyn LlmClient>, config: &'a AgentflowConfig, options: &'a PipelineOptions) -> Self {
        Self { llm, config, options }
    }

    /// A stage agent whose template is resolved from config, the template
    /// set, or `builtin`.
    pub(crate) fn agent<P: Payload>(
        &self,
        name: &str,
        builtin: &str,
        required: &[&str],
        optional: &[&str],
        defaults: P,
    ) -> Result<Arc<dyn Stage>, AgentflowError> {
        let template = self
            .options
            .templates
            .as_ref()
            .and_then(|set| set.get(name))
            .map_or(builtin, |t| t.source());

        let agent = StageAgent::builder(name, self.llm.clone())
            .template(template)
            .required_keys(required.iter().copied())
            .optional_keys(optional.iter().copied())
            .defaults(defaults)
            .configure(self.config)
            .build()?;
        Ok(Arc::new(agent))
    }

    /// A builder carrying the configured sink and run settings.
    pub(crate) fn pipeline(&self, name: &str) -> PipelineBuilder {
        let builder = PipelineBuilder::new(name).settings(self.config.pipeline.clone());
        match &self.options.sink {
            Some(sink) => builder.event_sink(sink.clone()),
            None => builder,
        }
    }
}

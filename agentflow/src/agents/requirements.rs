//! The requirements pipeline: extractor → analyzer → checker → generator.
//!
//! Input is `{"text": "<free-form requirements>"}`. An optional
//! [`CONTEXT`] key carries earlier conversation turns and is shown to every
//! stage.

use super::{AgentFactory, PipelineOptions};
use crate::config::AgentflowConfig;
use crate::errors::AgentflowError;
use crate::llm::LlmClient;
use crate::payloads::{AnalysisPayload, Documentation, ExtractionPayload, QualityReport};
use crate::pipeline::Coordinator;
use std::sync::Arc;

/// Pipeline name.
pub const PIPELINE: &str = "requirements";
/// Pulls structured requirements out of the text.
pub const EXTRACTOR: &str = "extractor";
/// Analyzes feasibility, dependencies and risks.
pub const ANALYZER: &str = "analyzer";
/// Reviews requirements and analysis for quality issues.
pub const CHECKER: &str = "checker";
/// Writes the final document.
pub const GENERATOR: &str = "generator";

/// Optional input key holding conversation history.
pub const CONTEXT: &str = "context";

/// Built-in extractor prompt.
pub const EXTRACTOR_TEMPLATE: &str = r#"You are a requirements extraction specialist.
Read the user input below and list every requirement it states or clearly implies.
Use the conversation so far to resolve references and earlier clarifications.

Conversation so far (may be empty):
{context}

User input:
{text}

Reply with a single JSON object of this shape and nothing else:
{"functional_requirements": ["..."], "non_functional_requirements": ["..."], "clarification_needed": null, "requirements_complete": true}
"#;

/// Built-in analyzer prompt.
pub const ANALYZER_TEMPLATE: &str = r#"You are a requirements analysis specialist.
Assess the extracted requirements below.

Conversation so far (may be empty):
{context}

Requirements:
{requirements}

Reply with a single JSON object with the keys functional_analysis, non_functional_analysis,
technical_feasibility, dependencies, risks, recommendations and complexity (one of "low", "medium", "high").
"#;

/// Built-in checker prompt.
pub const CHECKER_TEMPLATE: &str = r#"You are a requirements quality reviewer.
Check the requirements and their analysis for gaps, ambiguity and contradictions.

Conversation so far (may be empty):
{context}

Requirements:
{requirements}

Analysis:
{analysis}

Reply with a single JSON object:
{"quality_score": 0.0, "issues": ["..."], "suggestions": ["..."]}
The quality score is between 0 and 1.
"#;

/// Built-in generator prompt.
pub const GENERATOR_TEMPLATE: &str = r#"You are a technical documentation writer.
Write a requirements specification from the material below.

Conversation so far (may be empty):
{context}

Requirements:
{requirements}

Analysis:
{analysis}

Quality review:
{quality_check}

Reply with a single JSON object with the keys title, overview, executive_summary,
sections (a list of objects with title and content) and implementation_plan.
"#;

/// Builds the requirements pipeline with default options.
pub fn pipeline(llm: Arc<dyn LlmClient>, config: &AgentflowConfig) -> Result<Coordinator, AgentflowError> {
    pipeline_with(llm, config, &PipelineOptions::default())
}

/// Builds the requirements pipeline.
pub fn pipeline_with(
    llm: Arc<dyn LlmClient>,
    config: &AgentflowConfig,
    options: &PipelineOptions,
) -> Result<Coordinator, AgentflowError> {
    let factory = AgentFactory::new(llm, config, options);

    let extractor = factory.agent(EXTRACTOR, EXTRACTOR_TEMPLATE, &["text"], &[CONTEXT], ExtractionPayload::default())?;
    let analyzer = factory.agent(
        ANALYZER,
        ANALYZER_TEMPLATE,
        &["requirements"],
        &["text", CONTEXT],
        AnalysisPayload::default(),
    )?;
    let checker = factory.agent(
        CHECKER,
        CHECKER_TEMPLATE,
        &["requirements", "analysis"],
        &["text", CONTEXT],
        QualityReport::default(),
    )?;
    let generator = factory.agent(
        GENERATOR,
        GENERATOR_TEMPLATE,
        &["requirements", "analysis", "quality_check"],
        &["text", CONTEXT],
        Documentation::default(),
    )?;

    let coordinator = factory
        .pipeline(PIPELINE)
        .stage(extractor, &[])?
        .stage(analyzer, &[("requirements", EXTRACTOR)])?
        .stage(checker, &[("requirements", EXTRACTOR), ("analysis", ANALYZER)])?
        .stage(
            generator,
            &[
                ("requirements", EXTRACTOR),
                ("analysis", ANALYZER),
                ("quality_check", CHECKER),
            ],
        )?
        .build()?;
    Ok(coordinator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageOverrides;
    use crate::errors::TemplateError;
    use crate::template::PromptTemplate;
    use crate::testing::ScriptedLlmClient;

    #[test]
    fn test_builtin_templates_parse() {
        for (name, source) in [
            (EXTRACTOR, EXTRACTOR_TEMPLATE),
            (ANALYZER, ANALYZER_TEMPLATE),
            (CHECKER, CHECKER_TEMPLATE),
            (GENERATOR, GENERATOR_TEMPLATE),
        ] {
            assert!(PromptTemplate::parse(name, source).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_stage_order() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let coordinator = pipeline(llm, &AgentflowConfig::default()).unwrap();
        assert_eq!(coordinator.name(), PIPELINE);
        assert_eq!(coordinator.stage_names(), vec![EXTRACTOR, ANALYZER, CHECKER, GENERATOR]);
    }

    #[test]
    fn test_template_override_with_unknown_key_fails() {
        let config = AgentflowConfig::default().with_stage_override(
            CHECKER,
            StageOverrides {
                template: Some("Review {requirements} against {budget}".to_string()),
                ..StageOverrides::default()
            },
        );
        let err = pipeline(Arc::new(ScriptedLlmClient::new()), &config).unwrap_err();
        assert!(matches!(
            err,
            AgentflowError::Template(TemplateError::UnknownPlaceholders { .. })
        ));
    }
}

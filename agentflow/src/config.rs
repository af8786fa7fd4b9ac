//! Configuration for agents and pipelines.
//!
//! One [`AgentflowConfig`] value is built by the caller and handed to the
//! pipeline constructors; nothing in the crate reads configuration from
//! global state.
//!
//! Sources are layered with the `config` crate: serde defaults, then an
//! optional JSON file, then `AGENTFLOW_*` environment variables. Nested keys
//! use `__` as separator, e.g. `AGENTFLOW_LLM__MODEL` or
//! `AGENTFLOW_RETRY__MAX_ATTEMPTS`.

use crate::errors::ConfigError;
use crate::llm::CompletionConfig;
use crate::retry::RetryConfig;
use ::config::builder::{ConfigBuilder, DefaultState};
use ::config::{Config, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables read by [`AgentflowConfig::with_env_overrides`].
pub const ENV_PREFIX: &str = "AGENTFLOW";

/// Settings for the chat-completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Model identifier sent to the provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum tokens to generate per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Stop sequences.
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    /// Timeout for a single call in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

const fn default_temperature() -> f64 {
    0.7
}

const fn default_max_tokens() -> u32 {
    2000
}

const fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop_sequences: Vec::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl LlmSettings {
    /// Gets the call timeout as a Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Builds the sampling parameters for a call.
    #[must_use]
    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop_sequences: self.stop_sequences.clone(),
        }
    }
}

/// Per-stage overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOverrides {
    /// Temperature for this stage only.
    pub temperature: Option<f64>,
    /// Token limit for this stage only.
    pub max_tokens: Option<u32>,
    /// Replacement prompt template.
    pub template: Option<String>,
}

/// Settings applying to a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Wall-clock budget for the whole run. `None` means unbounded.
    pub deadline_ms: Option<u64>,
    /// Whether lifecycle events are sent to the event sink.
    pub emit_events: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            deadline_ms: None,
            emit_events: true,
        }
    }
}

impl PipelineSettings {
    /// Gets the deadline as a Duration.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentflowConfig {
    /// Provider settings.
    pub llm: LlmSettings,
    /// Retry policy for transient LLM errors.
    pub retry: RetryConfig,
    /// Run-wide settings.
    pub pipeline: PipelineSettings,
    /// Per-stage overrides keyed by stage name.
    pub stages: BTreeMap<String, StageOverrides>,
}

impl AgentflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration from a JSON string and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::from_str(json, FileFormat::Json)))
    }

    /// Reads configuration from a JSON file and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(json_file(path.as_ref())))
    }

    /// Layers an optional JSON file and the process environment over the
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(json_file(path));
        }
        Self::build(builder.add_source(environment(None)))
    }

    /// Applies `AGENTFLOW_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.merge_environment(environment(None))
    }

    /// Applies `AGENTFLOW_*` variables from `vars` instead of the process
    /// environment.
    pub fn with_overrides_from<I, K, V>(self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: Map<String, String> = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.merge_environment(environment(Some(vars)))
    }

    fn merge_environment(self, env: Environment) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(Config::try_from(&self)?).add_source(env))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the run deadline.
    #[must_use]
    pub const fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.pipeline.deadline_ms = Some(deadline_ms);
        self
    }

    /// Sets an override for one stage.
    #[must_use]
    pub fn with_stage_override(mut self, stage: impl Into<String>, overrides: StageOverrides) -> Self {
        self.stages.insert(stage.into(), overrides);
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        check_temperature("llm.temperature", self.llm.temperature)?;
        if self.llm.max_tokens == 0 {
            return Err(ConfigError::invalid("llm.max_tokens", "must be positive"));
        }
        if self.llm.timeout_ms == 0 {
            return Err(ConfigError::invalid("llm.timeout_ms", "must be positive"));
        }
        for (stage, overrides) in &self.stages {
            if let Some(t) = overrides.temperature {
                check_temperature(&format!("stages.{stage}.temperature"), t)?;
            }
            if overrides.max_tokens == Some(0) {
                return Err(ConfigError::invalid(
                    format!("stages.{stage}.max_tokens"),
                    "must be positive",
                ));
            }
        }
        Ok(())
    }

    /// Sampling parameters for `stage`, with overrides applied.
    #[must_use]
    pub fn completion_for(&self, stage: &str) -> CompletionConfig {
        let mut config = self.llm.completion_config();
        if let Some(overrides) = self.stages.get(stage) {
            if let Some(t) = overrides.temperature {
                config.temperature = t;
            }
            if let Some(m) = overrides.max_tokens {
                config.max_tokens = m;
            }
        }
        config
    }

    /// Template override for `stage`, if configured.
    #[must_use]
    pub fn template_override(&self, stage: &str) -> Option<&str> {
        self.stages.get(stage).and_then(|o| o.template.as_deref())
    }
}

fn json_file(path: &Path) -> File<::config::FileSourceFile, FileFormat> {
    File::from(path).format(FileFormat::Json).required(true)
}

fn environment(source: Option<Map<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .source(source)
}

fn check_temperature(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=2.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is outside [0, 2]")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentflowConfig::default();
        assert_eq!(config.llm.max_tokens, 2000);
        assert_eq!(config.llm.timeout(), Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.pipeline.deadline().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = AgentflowConfig::from_json_str(
            r#"{"llm": {"model": "deepseek-chat", "temperature": 0.2}, "pipeline": {"deadline_ms": 1000}}"#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "deepseek-chat");
        assert_eq!(config.llm.max_tokens, 2000);
        assert_eq!(config.pipeline.deadline(), Some(Duration::from_secs(1)));
        assert!(config.pipeline.emit_events);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let err = AgentflowConfig::from_json_str(r#"{"retry": {"max_attempts": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("retry.max_attempts"));
    }

    #[test]
    fn test_validate_rejects_bad_stage_temperature() {
        let config = AgentflowConfig::new().with_stage_override(
            "checker",
            StageOverrides {
                temperature: Some(3.5),
                ..StageOverrides::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_completion_for_applies_overrides() {
        let config = AgentflowConfig::new().with_stage_override(
            "checker",
            StageOverrides {
                temperature: Some(0.1),
                max_tokens: Some(4000),
                template: None,
            },
        );

        let checker = config.completion_for("checker");
        assert!((checker.temperature - 0.1).abs() < f64::EPSILON);
        assert_eq!(checker.max_tokens, 4000);

        let other = config.completion_for("extractor");
        assert!((other.temperature - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overrides_from_vars() {
        let config = AgentflowConfig::new()
            .with_overrides_from([
                ("AGENTFLOW_LLM__MODEL", "qwen-max"),
                ("AGENTFLOW_RETRY__MAX_ATTEMPTS", "5"),
                ("AGENTFLOW_PIPELINE__DEADLINE_MS", "30000"),
            ])
            .unwrap();

        assert_eq!(config.llm.model, "qwen-max");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.pipeline.deadline(), Some(Duration::from_secs(30)));
        assert_eq!(config.llm.max_tokens, 2000);
    }

    #[test]
    fn test_overrides_keep_existing_values() {
        let config = AgentflowConfig::new()
            .with_deadline_ms(1000)
            .with_overrides_from([("AGENTFLOW_LLM__TEMPERATURE", "0.3")])
            .unwrap();

        assert_eq!(config.pipeline.deadline_ms, Some(1000));
        assert_eq!(config.llm.api_key_env.as_deref(), Some("OPENAI_API_KEY"));
        assert!((config.llm.temperature - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overrides_reject_garbage() {
        let result = AgentflowConfig::new().with_overrides_from([("AGENTFLOW_RETRY__MAX_ATTEMPTS", "many")]);
        assert!(matches!(result, Err(ConfigError::Load(_))));

        let result = AgentflowConfig::new().with_overrides_from([("AGENTFLOW_RETRY__MAX_ATTEMPTS", "0")]);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}

//! The LLM-backed stage: render, call, parse, conform.

use super::{Stage, StageContext, StageInput};
use crate::config::AgentflowConfig;
use crate::errors::{LlmError, StageError, TemplateError};
use crate::events::STAGE_RETRY;
use crate::llm::{CompletionConfig, LlmClient, Usage};
use crate::observability::SpanTimer;
use crate::parser::{parse_json_object, JsonMap};
use crate::payloads::{conform, Payload};
use crate::retry::{should_retry, RetryConfig, RetryDecision, RetryState};
use crate::stages::result::{Degradation, StageResult};
use crate::template::PromptTemplate;
use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// A stage that asks an LLM for a `P` and never fails on a bad answer.
///
/// Missing or empty required input keys fail the stage with
/// [`StageError::InvalidInput`]. Everything after validation (LLM errors,
/// unparsable text, ill-typed fields) degrades to the stage defaults instead.
pub struct StageAgent<P: Payload> {
    name: String,
    template: PromptTemplate,
    required: Vec<String>,
    optional: Vec<String>,
    defaults: P,
    default_fields: Vec<String>,
    llm: Arc<dyn LlmClient>,
    completion: CompletionConfig,
    retry: RetryConfig,
    call_timeout: Duration,
}

/// Builder for [`StageAgent`].
pub struct StageAgentBuilder<P: Payload> {
    name: String,
    llm: Arc<dyn LlmClient>,
    template: Option<String>,
    template_override: Option<String>,
    required: Vec<String>,
    optional: Vec<String>,
    defaults: P,
    completion: CompletionConfig,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl<P: Payload> StageAgentBuilder<P> {
    /// Sets the prompt template source.
    #[must_use]
    pub fn template(mut self, source: impl Into<String>) -> Self {
        self.template = Some(source.into());
        self
    }

    /// Adds keys that must be present and non-empty.
    #[must_use]
    pub fn required_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Adds keys the template may reference but the input may omit.
    #[must_use]
    pub fn optional_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Sets the fallback payload. Defaults to `P::default()`.
    #[must_use]
    pub fn defaults(mut self, defaults: P) -> Self {
        self.defaults = defaults;
        self
    }

    /// Sets the sampling parameters.
    #[must_use]
    pub fn completion(mut self, completion: CompletionConfig) -> Self {
        self.completion = completion;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the timeout for a single LLM call.
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Applies sampling, retry, timeout and template settings for this stage.
    ///
    /// A template override in `config` takes precedence over
    /// [`template`](Self::template) regardless of call order.
    #[must_use]
    pub fn configure(mut self, config: &AgentflowConfig) -> Self {
        self.completion = config.completion_for(&self.name);
        self.retry = config.retry.clone();
        self.call_timeout = config.llm.timeout();
        self.template_override = config.template_override(&self.name).map(str::to_string);
        self
    }

    /// Parses the template and checks it only uses declared keys.
    pub fn build(self) -> Result<StageAgent<P>, TemplateError> {
        let source = self
            .template_override
            .or(self.template)
            .ok_or_else(|| TemplateError::Load {
                template: self.name.clone(),
                message: "no template configured".to_string(),
            })?;

        let template = PromptTemplate::parse(self.name.clone(), source)?;
        let known: Vec<&str> = self
            .required
            .iter()
            .chain(self.optional.iter())
            .map(String::as_str)
            .collect();
        template.check_placeholders(&known)?;

        let default_fields = conform(&JsonMap::new(), &self.defaults).defaulted_fields;
        Ok(StageAgent {
            name: self.name,
            template,
            required: self.required,
            optional: self.optional,
            defaults: self.defaults,
            default_fields,
            llm: self.llm,
            completion: self.completion,
            retry: self.retry,
            call_timeout: self.call_timeout,
        })
    }
}

impl<P: Payload> StageAgent<P> {
    /// Starts building a stage named `name` that calls `llm`.
    #[must_use]
    pub fn builder(name: impl Into<String>, llm: Arc<dyn LlmClient>) -> StageAgentBuilder<P> {
        StageAgentBuilder {
            name: name.into(),
            llm,
            template: None,
            template_override: None,
            required: Vec::new(),
            optional: Vec::new(),
            defaults: P::default(),
            completion: CompletionConfig::default(),
            retry: RetryConfig::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Required input keys.
    #[must_use]
    pub fn required_keys(&self) -> &[String] {
        &self.required
    }

    /// Optional input keys.
    #[must_use]
    pub fn optional_keys(&self) -> &[String] {
        &self.optional
    }

    /// The fallback payload.
    #[must_use]
    pub const fn defaults(&self) -> &P {
        &self.defaults
    }

    /// The parsed prompt template.
    #[must_use]
    pub const fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Runs the stage outside a pipeline.
    pub async fn process(&self, input: &StageInput) -> Result<StageResult, StageError> {
        self.execute(input, &StageContext::detached()).await
    }

    fn validate(&self, input: &StageInput) -> Result<(), StageError> {
        let mut missing = input.missing_keys(&self.required);
        if missing.is_empty() && input.is_empty() {
            missing.push("input".to_string());
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StageError::invalid_input(self.name.clone(), missing))
        }
    }

    /// Calls the LLM, retrying transient failures.
    async fn call_llm(&self, prompt: &str, ctx: &StageContext) -> (Result<String, LlmError>, RetryState, Usage) {
        let fingerprint = prompt_fingerprint(prompt);
        let mut state = RetryState::new();
        let mut usage = Usage::default();

        loop {
            state.record_attempt();
            debug!(
                stage = %self.name,
                run_id = %ctx.run_id(),
                attempt = state.attempts,
                prompt_sha256 = %fingerprint,
                prompt,
                "LLM prompt"
            );

            let outcome = match tokio::time::timeout(self.call_timeout, self.llm.complete(prompt, &self.completion)).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout {
                    timeout_ms: u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };

            let err = match outcome {
                Ok(completion) => {
                    usage += completion.usage;
                    debug!(
                        stage = %self.name,
                        run_id = %ctx.run_id(),
                        attempt = state.attempts,
                        prompt_sha256 = %fingerprint,
                        tokens = completion.usage.total_tokens(),
                        response = %completion.text,
                        "LLM response"
                    );
                    return (Ok(completion.text), state, usage);
                }
                Err(err) => err,
            };

            match should_retry(&state, &self.retry, err.is_transient()) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        stage = %self.name,
                        attempt = state.attempts,
                        error = %err,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Transient LLM error, retrying"
                    );
                    ctx.emit(
                        STAGE_RETRY,
                        json!({
                            "stage": self.name,
                            "attempt": state.attempts,
                            "error": err.to_string(),
                            "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        }),
                    )
                    .await;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    warn!(
                        stage = %self.name,
                        attempts = state.attempts,
                        error = %err,
                        transient = err.is_transient(),
                        "LLM call failed, using stage defaults"
                    );
                    return (Err(err), state, usage);
                }
            }
        }
    }

    fn degraded(&self, degradation: Degradation) -> StageResult {
        StageResult::degraded(self.name.clone(), self.defaults.clone(), degradation)
            .with_defaulted_fields(self.default_fields.clone())
    }
}

#[async_trait]
impl<P: Payload> Stage for StageAgent<P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StageInput, ctx: &StageContext) -> Result<StageResult, StageError> {
        let timer = SpanTimer::start(self.name.clone());
        self.validate(input)?;

        let prompt = self.template.render(input.as_map());
        let (outcome, state, usage) = self.call_llm(&prompt, ctx).await;

        let result = match outcome {
            Err(err) => self.degraded(Degradation::LlmFailed {
                error_kind: err.kind().to_string(),
                message: err.to_string(),
            }),
            Ok(text) => match parse_json_object(&text) {
                Err(failure) => self.degraded(Degradation::Unparsable {
                    message: failure.to_string(),
                }),
                Ok(parsed) => {
                    let conformed = conform(&parsed, &self.defaults);
                    if conformed.accepted == 0 {
                        warn!(stage = %self.name, keys = ?parsed.keys().collect::<Vec<_>>(), "Parsed object had no usable fields");
                        self.degraded(Degradation::Unparsable {
                            message: "parsed object had no usable fields".to_string(),
                        })
                    } else {
                        if !conformed.defaulted_fields.is_empty() {
                            debug!(stage = %self.name, fields = ?conformed.defaulted_fields, "Filled missing fields with defaults");
                        }
                        StageResult::completed(self.name.clone(), conformed.payload)
                            .with_defaulted_fields(conformed.defaulted_fields)
                    }
                }
            },
        };

        let result = result
            .with_attempts(state.attempts)
            .with_usage(usage)
            .with_duration_ms(timer.finish());
        info!(
            stage = %self.name,
            run_id = %ctx.run_id(),
            status = %result.status,
            attempts = result.attempts,
            duration_ms = result.duration_ms,
            "Stage finished"
        );
        Ok(result)
    }
}

impl<P: Payload> std::fmt::Debug for StageAgent<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageAgent")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

/// Hex SHA-256 of a prompt, used to correlate audit log lines.
#[must_use]
pub fn prompt_fingerprint(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

//! Test doubles for LLM clients and stages.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::{LlmError, StageError};
use crate::llm::{Completion, CompletionConfig, LlmClient, Usage};
use crate::payloads::Payload;
use crate::stages::{Stage, StageContext, StageInput, StageResult};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Error(LlmError),
}

#[derive(Debug)]
struct Route {
    pattern: String,
    /// Replies consumed one per matching call before `steady` applies.
    leading: Vec<Reply>,
    steady: Reply,
    hits: usize,
}

impl Route {
    fn next_reply(&mut self) -> Reply {
        let reply = self.leading.get(self.hits).cloned().unwrap_or_else(|| self.steady.clone());
        self.hits += 1;
        reply
    }
}

/// An [`LlmClient`] that answers from a script.
///
/// Routes match on a substring of the prompt and are tried in the order they
/// were added. Prompts that match no route get the default reply, or an
/// [`LlmError::InvalidRequest`] if none was set.
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    routes: Mutex<Vec<Route>>,
    default: Mutex<Option<Reply>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    /// Creates a client with no script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn route(self, pattern: impl Into<String>, leading: Vec<Reply>, steady: Reply) -> Self {
        self.routes.lock().push(Route {
            pattern: pattern.into(),
            leading,
            steady,
            hits: 0,
        });
        self
    }

    /// Answers prompts containing `pattern` with `text`.
    #[must_use]
    pub fn respond(self, pattern: impl Into<String>, text: impl Into<String>) -> Self {
        self.route(pattern, Vec::new(), Reply::Text(text.into()))
    }

    /// Fails every prompt containing `pattern` with `error`.
    #[must_use]
    pub fn fail(self, pattern: impl Into<String>, error: LlmError) -> Self {
        self.route(pattern, Vec::new(), Reply::Error(error))
    }

    /// Fails the first `times` prompts containing `pattern`, then answers
    /// with `text`.
    #[must_use]
    pub fn fail_then_respond(
        self,
        pattern: impl Into<String>,
        times: usize,
        error: LlmError,
        text: impl Into<String>,
    ) -> Self {
        self.route(pattern, vec![Reply::Error(error); times], Reply::Text(text.into()))
    }

    /// Answers unmatched prompts with `text`.
    #[must_use]
    pub fn default_response(self, text: impl Into<String>) -> Self {
        *self.default.lock() = Some(Reply::Text(text.into()));
        self
    }

    /// Waits `delay` before every reply.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `complete` calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Number of prompts received that contain `pattern`.
    #[must_use]
    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.prompts.lock().iter().filter(|p| p.contains(pattern)).count()
    }

    fn next_reply(&self, prompt: &str) -> Reply {
        let mut routes = self.routes.lock();
        if let Some(route) = routes.iter_mut().find(|r| prompt.contains(&r.pattern)) {
            return route.next_reply();
        }
        drop(routes);
        self.default
            .lock()
            .clone()
            .unwrap_or_else(|| Reply::Error(LlmError::InvalidRequest("no scripted response for prompt".to_string())))
    }
}

/// Rough token estimate so usage totals are non-zero and deterministic.
fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &str, _config: &CompletionConfig) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        let reply = self.next_reply(prompt);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Reply::Text(text) => {
                let usage = Usage::new(estimate_tokens(prompt), estimate_tokens(&text));
                Ok(Completion::text(text).with_usage(usage))
            }
            Reply::Error(err) => Err(err),
        }
    }
}

/// A stage that returns a fixed payload after a delay.
#[derive(Debug)]
pub struct SlowStage<P: Payload> {
    name: String,
    delay: Duration,
    payload: P,
}

impl<P: Payload> SlowStage<P> {
    /// Creates a slow stage returning `payload`.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration, payload: P) -> Self {
        Self {
            name: name.into(),
            delay,
            payload,
        }
    }
}

#[async_trait]
impl<P: Payload> Stage for SlowStage<P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: &StageInput, _ctx: &StageContext) -> Result<StageResult, StageError> {
        tokio::time::sleep(self.delay).await;
        Ok(StageResult::completed(self.name.clone(), self.payload.clone()))
    }
}

/// A stage that echoes its input and records every input it saw.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    inputs: Mutex<Vec<StageInput>>,
}

impl RecordingStage {
    /// Creates a new recording stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Inputs seen so far.
    #[must_use]
    pub fn inputs(&self) -> Vec<StageInput> {
        self.inputs.lock().clone()
    }

    /// Number of executions.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.inputs.lock().len()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StageInput, _ctx: &StageContext) -> Result<StageResult, StageError> {
        self.inputs.lock().push(input.clone());
        Ok(StageResult::completed(self.name.clone(), input.as_map().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_by_substring() {
        let client = ScriptedLlmClient::new()
            .respond("extract", r#"{"a": 1}"#)
            .respond("analy", r#"{"b": 2}"#);
        let config = CompletionConfig::default();

        let first = client.complete("please extract this", &config).await.unwrap();
        let second = client.complete("now analyze", &config).await.unwrap();

        assert_eq!(first.text, r#"{"a": 1}"#);
        assert_eq!(second.text, r#"{"b": 2}"#);
        assert_eq!(client.call_count(), 2);
        assert_eq!(client.calls_matching("analyze"), 1);
    }

    #[tokio::test]
    async fn test_fail_then_respond() {
        let client =
            ScriptedLlmClient::new().fail_then_respond("x", 2, LlmError::Connection("reset".to_string()), "ok");
        let config = CompletionConfig::default();

        assert!(client.complete("x", &config).await.is_err());
        assert!(client.complete("x", &config).await.is_err());
        assert_eq!(client.complete("x", &config).await.unwrap().text, "ok");
    }

    #[tokio::test]
    async fn test_unmatched_without_default_is_fatal() {
        let client = ScriptedLlmClient::new();
        let err = client.complete("anything", &CompletionConfig::default()).await.unwrap_err();
        assert!(!err.is_transient());

        let client = ScriptedLlmClient::new().default_response("fallback");
        let completion = client.complete("anything", &CompletionConfig::default()).await.unwrap();
        assert_eq!(completion.text, "fallback");
        assert_eq!(completion.usage.total_tokens(), 2);
    }
}

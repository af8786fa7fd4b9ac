//! OpenAI-compatible chat-completions client.

use super::{Completion, CompletionConfig, LlmClient, Usage};
use crate::config::LlmSettings;
use crate::errors::LlmError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Client for any endpoint speaking the `/chat/completions` protocol
/// (OpenAI, DeepSeek, Qwen, vLLM, Ollama's compatibility layer).
///
/// `reqwest::Client` pools connections internally, so one instance should be
/// shared across every run.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiCompatibleClient {
    /// Creates a client for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        })
    }

    /// Creates a client from configuration, reading the API key from the
    /// environment variable named by `api_key_env`.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, LlmError> {
        let api_key = settings
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty());
        Self::new(
            settings.base_url.clone(),
            settings.model.clone(),
            api_key,
            settings.timeout(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, prompt: &str, config: &CompletionConfig) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
            "stream": false,
        });
        if !config.stop_sequences.is_empty() {
            body["stop"] = json!(config.stop_sequences);
        }
        body
    }
}

/// Maps an HTTP status to the error taxonomy.
fn classify_status(status: u16, message: String) -> LlmError {
    match status {
        429 => LlmError::RateLimited(message),
        401 | 403 => LlmError::Auth(message),
        408 => LlmError::Timeout { timeout_ms: 0 },
        500..=599 => LlmError::Server { status, message },
        _ => LlmError::InvalidRequest(format!("HTTP {status}: {message}")),
    }
}

fn classify_transport(err: &reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout { timeout_ms: 0 }
    } else if err.is_decode() {
        LlmError::Decode(err.to_string())
    } else {
        LlmError::Connection(err.to_string())
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str, config: &CompletionConfig) -> Result<Completion, LlmError> {
        let mut request = self.http.post(self.endpoint()).json(&self.request_body(prompt, config));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), text));
        }

        let body: ChatResponse = response.json().await.map_err(|e| classify_transport(&e))?;
        let model = body.model;
        let usage = body
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Decode("response contained no choices".to_string()))?;

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            usage,
            model,
            finish_reason: choice.finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(429, String::new()), LlmError::RateLimited(_)));
        assert!(matches!(classify_status(401, String::new()), LlmError::Auth(_)));
        assert!(matches!(classify_status(503, String::new()), LlmError::Server { status: 503, .. }));
        assert!(matches!(classify_status(400, String::new()), LlmError::InvalidRequest(_)));
        assert!(classify_status(502, String::new()).is_transient());
        assert!(!classify_status(404, String::new()).is_transient());
    }

    #[test]
    fn test_request_body_includes_stop_sequences() {
        let client = OpenAiCompatibleClient::new(
            "http://localhost:8000/v1/",
            "test-model",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let config = CompletionConfig::default().with_stop("END");
        let body = client.request_body("hello", &config);

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["stop"][0], "END");
        assert_eq!(client.endpoint(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_request_body_omits_empty_stop() {
        let client =
            OpenAiCompatibleClient::new("http://x", "m", None, Duration::from_secs(1)).unwrap();
        let body = client.request_body("p", &CompletionConfig::default());
        assert!(body.get("stop").is_none());
    }
}

//! Answer generation over an OpenAI-compatible chat-completion API.
//!
//! [`AnswerGenerator`] renders the prompt, sends it through a
//! [`CompletionClient`], and retries transient failures with exponential
//! backoff. It never returns an error to the caller once constructed:
//! exhausted or fatal failures become a canned apology chosen by
//! [`FailureClass`].
//!
//! # Retry Strategy
//!
//! Every failure goes through [`classify`]:
//!
//! | Failure | Class | Retried |
//! |---------|-------|---------|
//! | HTTP 429 | rate limit | yes |
//! | HTTP 5xx, 408, timeout, transport | API error | yes |
//! | malformed response | unexpected | yes |
//! | other HTTP 4xx | API error | no |
//!
//! Attempt `n` (0-based) that fails retryably waits `retry_delay · 2^n`
//! before the next one, except after the last attempt. The wait is capped
//! at [`MAX_RETRY_DELAY`].

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::retry::{backoff_delay, delay_from_secs, is_transient_status};
pub use crate::retry::{Sleeper, TokioSleeper, MAX_RETRY_DELAY};

pub const RATE_LIMIT_APOLOGY: &str = "Maaf, terlalu banyak permintaan. Silakan coba lagi nanti.";
pub const API_ERROR_APOLOGY: &str = "Maaf, terjadi kesalahan pada API. Silakan coba lagi nanti.";
pub const UNEXPECTED_APOLOGY: &str =
    "Maaf, terjadi kesalahan tak terduga. Silakan coba lagi nanti.";

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion request timed out")]
    Timeout,
    #[error("completion transport error: {0}")]
    Transport(String),
    #[error("malformed completion response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CompletionError::Timeout
        } else if e.is_decode() {
            CompletionError::Decode(e.to_string())
        } else {
            CompletionError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimit,
    Api,
    Unexpected,
}

impl FailureClass {
    pub fn apology(self) -> &'static str {
        match self {
            FailureClass::RateLimit => RATE_LIMIT_APOLOGY,
            FailureClass::Api => API_ERROR_APOLOGY,
            FailureClass::Unexpected => UNEXPECTED_APOLOGY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Retryable(FailureClass),
    Fatal(FailureClass),
}

/// The single place that decides how a failure is handled.
pub fn classify(err: &CompletionError) -> Retry {
    match err {
        CompletionError::Status { status: 429, .. } => Retry::Retryable(FailureClass::RateLimit),
        CompletionError::Status { status, .. } if is_transient_status(*status) => {
            Retry::Retryable(FailureClass::Api)
        }
        CompletionError::Status { .. } => Retry::Fatal(FailureClass::Api),
        CompletionError::Timeout | CompletionError::Transport(_) => {
            Retry::Retryable(FailureClass::Api)
        }
        CompletionError::Decode(_) => Retry::Retryable(FailureClass::Unexpected),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One chat-completion call. `temperature: None` leaves it to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

// ============ Groq client ============

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Chat-completion client for Groq (or any OpenAI-compatible server).
pub struct GroqClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl GroqClient {
    /// Fails when `GROQ_API_KEY` was not provided.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("GROQ_API_KEY not set; export it or add it to a .env file")
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                config.endpoint.trim_end_matches('/')
            ),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionClient for GroqClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = ChatBody {
            model: &self.model,
            messages: &request.messages,
            max_tokens: self.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::Decode(e.to_string()))?;
        parse_completion_response(&json)
    }
}

/// Extract `choices[0].message.content`.
pub fn parse_completion_response(json: &serde_json::Value) -> Result<String, CompletionError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CompletionError::Decode("missing choices[0].message.content".to_string()))
}

// ============ Generator ============

/// Substitute `{context}` and `{query}` in one pass, so placeholder-like
/// text inside either value is left alone.
pub fn render_prompt(template: &str, context: &str, query: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + query.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{context}") {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{query}") {
            out.push_str(query);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

pub struct AnswerGenerator {
    client: Arc<dyn CompletionClient>,
    sleeper: Arc<dyn Sleeper>,
    system_prompt: String,
    context_template: String,
    temperature: f32,
    max_retries: u32,
    retry_delay: Duration,
}

impl AnswerGenerator {
    /// Build a generator backed by [`GroqClient`].
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let client = GroqClient::new(config)?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn new(client: Arc<dyn CompletionClient>, config: &GenerationConfig) -> Self {
        Self {
            client,
            sleeper: Arc::new(TokioSleeper),
            system_prompt: config.system_prompt.clone(),
            context_template: config.context_template.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries.max(1),
            retry_delay: delay_from_secs(config.retry_delay_secs),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Answer `question` from `context` using the system prompt.
    pub async fn generate(&self, question: &str, context: &str) -> String {
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(self.system_prompt.clone()),
                ChatMessage::user(render_prompt(&self.context_template, context, question)),
            ],
            temperature: Some(self.temperature),
        };
        self.complete_with_retry(&request).await
    }

    /// Send a bare prompt: one user message, no system prompt, server
    /// default temperature.
    pub async fn generate_simple(&self, prompt: &str) -> String {
        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            temperature: None,
        };
        self.complete_with_retry(&request).await
    }

    async fn complete_with_retry(&self, request: &CompletionRequest) -> String {
        let mut last_class = FailureClass::Unexpected;

        for attempt in 0..self.max_retries {
            match self.client.complete(request).await {
                Ok(answer) => {
                    if attempt > 0 {
                        tracing::info!(attempt, "completion succeeded after retry");
                    }
                    return answer;
                }
                Err(err) => match classify(&err) {
                    Retry::Fatal(class) => {
                        tracing::error!(attempt, error = %err, "completion failed, not retrying");
                        return class.apology().to_string();
                    }
                    Retry::Retryable(class) => {
                        last_class = class;
                        if attempt + 1 < self.max_retries {
                            let delay = backoff_delay(self.retry_delay, attempt);
                            tracing::warn!(
                                attempt,
                                delay_secs = delay.as_secs_f64(),
                                error = %err,
                                "completion failed, retrying"
                            );
                            self.sleeper.sleep(delay).await;
                        } else {
                            tracing::error!(attempt, error = %err, "completion failed, giving up");
                        }
                    }
                },
            }
        }

        last_class.apology().to_string()
    }
}

//! Completion client — hosted chat-completion endpoint wrapper
//!
//! Speaks the OpenAI-compatible `/chat/completions` wire format and adds:
//! - typed failure taxonomy (`Auth`, `RateLimited`, `Upstream`, `InvalidResponse`)
//! - bounded retry with backoff for transient failures
//! - a pull-based, finite, non-restartable token stream for incremental replies

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::LlmConfig;
use crate::models::Role;

// ============================================================================
// Wire-level message types
// ============================================================================

/// Role on the completion wire. Wider than the stored [`Role`]: the
/// orchestrator may prepend a system prompt that is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("completion endpoint rejected the credential: {0}")]
    Auth(String),

    #[error("completion endpoint rate limit exceeded")]
    RateLimited,

    #[error("completion endpoint upstream failure (HTTP {status})")]
    Upstream { status: u16 },

    #[error("invalid completion response: {0}")]
    InvalidResponse(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl CompletionError {
    /// Only rate limiting and 5xx upstream failures warrant a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::RateLimited | CompletionError::Upstream { .. }
        )
    }
}

/// Terminal failure of an in-flight stream. `partial` holds every fragment
/// emitted before the failure, so the caller can persist a visibly truncated
/// reply instead of silently losing it.
#[derive(Error, Debug)]
#[error("completion stream interrupted: {error}")]
pub struct StreamFailure {
    pub partial: String,
    pub error: CompletionError,
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl CompletionConfig {
    /// Build from the `[llm]` config section; the credential falls back to
    /// the `GROQ_API_KEY` environment variable.
    pub fn new(api_key: Option<String>, llm: &LlmConfig) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GROQ_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            base_url: llm.base_url.clone(),
            model: llm.model.clone(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            max_retries: llm.max_retries,
            retry_delay_ms: llm.retry_delay_ms,
        }
    }
}

// ============================================================================
// API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

// ============================================================================
// CompletionClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl CompletionClient {
    /// A missing credential fails here, at construction, not on first use.
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        if config.api_key.is_empty() {
            return Err(CompletionError::Auth(
                "missing API key (set GROQ_API_KEY)".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn retry_schedule(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries)
    }

    /// Full (non-incremental) reply for the given history.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let result = RetryIf::spawn(
            self.retry_schedule(),
            || self.complete_once(messages),
            CompletionError::is_retryable,
        )
        .await;

        if let Err(e) = &result {
            if e.is_retryable() {
                tracing::error!(
                    attempts = self.config.max_retries + 1,
                    error = %e,
                    "completion retry attempts exhausted"
                );
            }
        }
        result
    }

    async fn complete_once(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let response = self.send_request(messages, false).await?;

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

        let content = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("")
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(CompletionError::InvalidResponse(
                "empty completion content".to_string(),
            ));
        }
        Ok(content)
    }

    /// Incremental reply. Retries apply only while establishing the request;
    /// once the stream exists, failures surface through it with the partial
    /// text attached. Dropping the returned stream aborts the transfer and
    /// releases the connection.
    pub async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, CompletionError> {
        let response = RetryIf::spawn(
            self.retry_schedule(),
            || self.send_request(messages, true),
            CompletionError::is_retryable,
        )
        .await?;

        Ok(CompletionStream::new(response.bytes_stream().boxed()))
    }

    async fn send_request(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, CompletionError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        };

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request);
        if !stream {
            builder = builder.timeout(Duration::from_secs(60));
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), message = %message, "completion endpoint error");

        Err(match status.as_u16() {
            401 | 403 => CompletionError::Auth(message),
            429 => CompletionError::RateLimited,
            s if s >= 500 => CompletionError::Upstream { status: s },
            s => CompletionError::InvalidResponse(format!("unexpected HTTP {s}: {message}")),
        })
    }
}

// ============================================================================
// CompletionStream
// ============================================================================

/// Lazy, finite, non-restartable sequence of reply fragments.
///
/// Each [`next_fragment`](Self::next_fragment) pull may block on network I/O.
/// After the upstream completion signal the stream yields `None` forever;
/// re-iterating never repeats fragments. A mid-stream failure yields exactly
/// one `Err` carrying the partial text, then `None` forever.
pub struct CompletionStream {
    bytes: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    buffer: String,
    emitted: String,
    finished: bool,
}

impl CompletionStream {
    fn new(bytes: BoxStream<'static, Result<Bytes, reqwest::Error>>) -> Self {
        Self {
            bytes,
            buffer: String::new(),
            emitted: String::new(),
            finished: false,
        }
    }

    pub async fn next_fragment(&mut self) -> Option<Result<String, StreamFailure>> {
        if self.finished {
            return None;
        }

        loop {
            // Drain complete SSE lines already buffered before pulling more
            // bytes off the wire.
            while let Some(pos) = self.buffer.find('\n') {
                let line: String = self.buffer.drain(..=pos).collect();
                let line = line.trim();
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();

                if data == "[DONE]" {
                    self.finished = true;
                    return None;
                }

                let event: StreamEvent = match serde_json::from_str(data) {
                    Ok(event) => event,
                    Err(_) => continue,
                };
                let Some(choice) = event.choices.first() else {
                    continue;
                };

                if let Some(content) = choice.delta.content.as_ref().filter(|c| !c.is_empty()) {
                    if choice.finish_reason.is_some() {
                        self.finished = true;
                    }
                    self.emitted.push_str(content);
                    return Some(Ok(content.clone()));
                }
                if choice.finish_reason.is_some() {
                    self.finished = true;
                    return None;
                }
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => self.buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(self.failure(CompletionError::Http(e))));
                }
                None => {
                    self.finished = true;
                    return Some(Err(self.failure(CompletionError::InvalidResponse(
                        "stream ended before completion signal".to_string(),
                    ))));
                }
            }
        }
    }

    /// All text emitted so far, in order.
    pub fn emitted(&self) -> &str {
        &self.emitted
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn failure(&self, error: CompletionError) -> StreamFailure {
        StreamFailure {
            partial: self.emitted.clone(),
            error,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

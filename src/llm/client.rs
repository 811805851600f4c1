//! OpenAI-compatible completion client
//!
//! Works against any `/chat/completions` endpoint (OpenRouter, OpenAI,
//! Ollama's `/v1` shim, ...). Tool definitions are sent on every request with
//! `tool_choice: "auto"`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::types::{ChatMessage, ChatResponse, Tool};

/// Error type for chat operations
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("completion API rejected credentials (status {0})")]
    Unauthorized(u16),
    #[error("rate limited by completion API")]
    RateLimited,
    #[error("completion API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("empty response from completion API")]
    EmptyResponse,
}

/// Anything that can produce one assistant turn for a conversation
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Request one completion over `messages` with `tools` declared available
    async fn complete(&self, messages: &[ChatMessage], tools: &[Tool]) -> Result<ChatMessage, ChatError>;

    /// Model name used for logs and metrics
    fn model_name(&self) -> &str;
}

/// Client for an OpenAI-compatible chat completion endpoint
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ChatClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. `https://openrouter.ai/api/v1`
    /// * `api_key` - Bearer token
    /// * `model` - Model name, e.g. `deepseek/deepseek-chat`
    /// * `timeout` - Per-request timeout
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    /// Build the JSON request body for a completion
    pub fn request_body(&self, messages: &[ChatMessage], tools: &[Tool]) -> Result<serde_json::Value, ChatError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
            body["tool_choice"] = serde_json::json!("auto");
        }
        Ok(body)
    }

    /// Send an arbitrary request body and return the first choice's message
    pub async fn send(&self, body: &serde_json::Value) -> Result<ChatMessage, ChatError> {
        let endpoint = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;

        match status {
            200..=299 => {}
            401 | 403 => return Err(ChatError::Unauthorized(status)),
            429 => return Err(ChatError::RateLimited),
            _ => {
                warn!(status, body = %text, "Completion API returned error");
                return Err(ChatError::Api { status, body: text });
            }
        }

        parse_first_message(&text)
    }
}

/// Extract the first choice's message from a `/chat/completions` body
pub fn parse_first_message(text: &str) -> Result<ChatMessage, ChatError> {
    if text.trim().is_empty() {
        return Err(ChatError::EmptyResponse);
    }
    let response: ChatResponse = serde_json::from_str(text)?;
    if let Some(usage) = &response.usage {
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Completion usage"
        );
    }
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or(ChatError::EmptyResponse)
}

#[async_trait]
impl CompletionModel for ChatClient {
    async fn complete(&self, messages: &[ChatMessage], tools: &[Tool]) -> Result<ChatMessage, ChatError> {
        let body = self.request_body(messages, tools)?;
        debug!(model = %self.model, messages = messages.len(), "Sending completion request");
        self.send(&body).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

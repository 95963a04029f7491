//! Provider trait definitions for LLM API clients

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Request for a completion from an LLM provider
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, max_tokens: u32) -> Self {
        Self {
            model: None,
            messages,
            max_tokens,
            temperature: None,
            system_prompt: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// System prompt from the dedicated field, else from a `system` message
    pub fn system_text(&self) -> Option<&str> {
        self.system_prompt.as_deref().or_else(|| {
            self.messages
                .iter()
                .find(|m| m.role == "system")
                .map(|m| m.content.as_str())
        })
    }

    /// Messages other than `system` ones
    pub fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != "system")
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
    pub latency_ms: u64,
}

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Token limit: {message}")]
    TokenLimit { message: String },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Rate limits, token limits and timeouts clear up on their own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::TokenLimit { .. }
                | ProviderError::Timeout { .. }
        )
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Get the provider name (e.g., "openai", "gemini", "xai")
    fn name(&self) -> &str;

    /// Get the default model for this provider
    fn default_model(&self) -> &str;

    /// Send a completion request. Does not wait on the provider's pacing.
    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse>;

    /// Wait until the provider's request/token budget admits one more call
    /// and claim that slot. Providers without pacing return immediately.
    async fn pace(&self) {}

    /// One single-turn call without pacing: system prompt plus user prompt,
    /// text out, trimmed of surrounding whitespace.
    async fn call(&self, system: &str, user: &str, max_output_tokens: u32) -> ProviderResult<String> {
        let request =
            CompletionRequest::new(vec![Message::user(user)], max_output_tokens).with_system(system);
        let response = self.complete(&request).await?;
        Ok(response.content.trim().to_string())
    }

    /// [`pace`](Self::pace) then [`call`](Self::call).
    ///
    /// Adapters never retry; failures surface as-is for the caller to classify.
    async fn send(&self, system: &str, user: &str, max_output_tokens: u32) -> ProviderResult<String> {
        self.pace().await;
        self.call(system, user, max_output_tokens).await
    }
}

/// Value of a `retry-after` header in milliseconds (seconds on the wire)
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(60)
        * 1000
}

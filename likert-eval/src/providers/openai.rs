//! Chat-completion client for OpenAI and OpenAI-compatible endpoints
//!
//! Together and xAI expose the same `/chat/completions` surface, so one client
//! covers all three; only the name, base URL and key differ.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::traits::{
    retry_after_ms, CompletionRequest, CompletionResponse, LLMProvider, Message, ProviderError,
    ProviderResult,
};
use crate::runner::rate_limiter::RateLimiter;

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
pub const XAI_BASE_URL: &str = "https://api.x.ai/v1";

/// Chat-completion API client
pub struct OpenAIClient {
    name: String,
    api_key: String,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    default_model: String,
    temperature: Option<f32>,
}

impl OpenAIClient {
    /// Create a new OpenAI client
    pub fn new(api_key: String) -> Self {
        Self::compatible("openai", api_key, DEFAULT_BASE_URL)
    }

    /// Client for any endpoint speaking the chat-completion protocol
    pub fn compatible(name: impl Into<String>, api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key,
            base_url: base_url.into(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(500, 200_000)),
            default_model: DEFAULT_MODEL.to_string(),
            temperature: Some(1.0),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::Config("OPENAI_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set custom rate limits
    pub fn with_rate_limits(mut self, rpm: u32, tpm: u32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(rpm, tpm));
        self
    }

    /// Share or replace the pacing limiter
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    /// Set default model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Sampling temperature; `None` leaves it to the server
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Reasoning models reject `temperature` and take `max_completion_tokens`
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ChatError {
    error: ChatErrorDetail,
}

#[derive(Deserialize)]
struct ChatErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl ChatErrorDetail {
    fn is_quota(&self) -> bool {
        self.error_type.as_deref() == Some("insufficient_quota")
            || self.code.as_deref() == Some("insufficient_quota")
            || self.message.contains("exceeded your current quota")
    }

    fn is_token_limit(&self) -> bool {
        self.error_type.as_deref() == Some("tokens")
            || (self.code.as_deref() == Some("rate_limit_exceeded") && self.message.contains("tokens"))
            || self.message.contains("tokens per min")
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn pace(&self) {
        self.rate_limiter.acquire().await;
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        let start = Instant::now();

        let mut messages: Vec<ChatMessage> = Vec::new();
        if let Some(system) = request.system_text() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.extend(request.conversation().map(ChatMessage::from));

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let reasoning = is_reasoning_model(&model);
        let uses_completion_tokens = reasoning || model.starts_with("gpt-5");
        let temperature = if reasoning {
            None
        } else {
            request.temperature.or(self.temperature)
        };

        let body = ChatRequest {
            max_tokens: (!uses_completion_tokens).then_some(request.max_tokens),
            max_completion_tokens: uses_completion_tokens.then_some(request.max_tokens),
            model,
            messages,
            temperature,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if status == 429 {
            let retry_after = retry_after_ms(response.headers());

            // 429 covers request-rate limits, token-rate limits and exhausted
            // quota; only the first two clear up by waiting.
            let body = response.text().await.unwrap_or_default();
            if let Ok(error) = serde_json::from_str::<ChatError>(&body) {
                if error.error.is_quota() {
                    return Err(ProviderError::Auth(format!(
                        "{} quota exceeded: {}",
                        self.name, error.error.message
                    )));
                }
                if error.error.is_token_limit() {
                    return Err(ProviderError::TokenLimit {
                        message: error.error.message,
                    });
                }
                tracing::debug!("{} rate limited: {}", self.name, error.error.message);
            }

            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ChatError>(&body) {
                Ok(error) => error.error.message,
                Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
            };

            if status == 401 || status == 403 {
                return Err(ProviderError::Auth(format!(
                    "{} ({}): {}",
                    self.name,
                    status.as_u16(),
                    message
                )));
            }

            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let (input_tokens, output_tokens) = api_response
            .usage
            .as_ref()
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        self.rate_limiter.record_tokens(input_tokens + output_tokens).await;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

        let content = choice.message.content.unwrap_or_default();
        let finish_reason = choice.finish_reason.unwrap_or_else(|| "unknown".to_string());

        if finish_reason == "length" && content.trim().is_empty() {
            return Err(ProviderError::TokenLimit {
                message: format!("output cap of {} tokens reached before any text", request.max_tokens),
            });
        }

        Ok(CompletionResponse {
            content,
            model: api_response.model.unwrap_or_else(|| self.default_model.clone()),
            input_tokens,
            output_tokens,
            finish_reason,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_model_detection() {
        assert!(is_reasoning_model("o1-mini"));
        assert!(is_reasoning_model("o3"));
        assert!(!is_reasoning_model("gpt-4o"));
        assert!(!is_reasoning_model("grok-beta"));
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::from(&Message::user("hi"))],
            max_tokens: Some(200),
            max_completion_tokens: None,
            temperature: Some(1.0),
        };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["max_tokens"], 200);
        assert!(json.get("max_completion_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_error_classification() {
        let quota: ChatError = serde_json::from_str(
            r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#,
        )
        .unwrap();
        assert!(quota.error.is_quota());

        let tokens: ChatError = serde_json::from_str(
            r#"{"error":{"message":"Rate limit reached for tokens per min (TPM)","type":"tokens"}}"#,
        )
        .unwrap();
        assert!(tokens.error.is_token_limit());
        assert!(!tokens.error.is_quota());

        let requests: ChatError = serde_json::from_str(
            r#"{"error":{"message":"Rate limit reached for requests","type":"requests"}}"#,
        )
        .unwrap();
        assert!(!requests.error.is_token_limit());
    }

    #[test]
    fn test_compatible_client_name() {
        let client = OpenAIClient::compatible("xai", "key".into(), XAI_BASE_URL).with_model("grok-beta");
        assert_eq!(client.name(), "xai");
        assert_eq!(client.default_model(), "grok-beta");
    }
}

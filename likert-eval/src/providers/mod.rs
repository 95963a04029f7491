//! LLM Provider implementations

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAIClient;
pub use traits::{
    CompletionRequest, CompletionResponse, LLMProvider, Message, ProviderError, ProviderResult,
};

use crate::config::{Config, ProviderSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared handle to a provider, cloned into every dispatch task
pub type SharedProvider = Arc<dyn LLMProvider + Send + Sync>;

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Gemini,
    Together,
    Xai,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Together => "together",
            ProviderKind::Xai => "xai",
        }
    }

    /// Environment variable holding the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Together => "TOGETHER_API_KEY",
            ProviderKind::Xai => "XAI_API_KEY",
        }
    }

    pub fn all() -> Vec<ProviderKind> {
        vec![
            ProviderKind::OpenAI,
            ProviderKind::Anthropic,
            ProviderKind::Gemini,
            ProviderKind::Together,
            ProviderKind::Xai,
        ]
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "gpt" => Ok(ProviderKind::OpenAI),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "together" | "togetherai" => Ok(ProviderKind::Together),
            "xai" | "grok" => Ok(ProviderKind::Xai),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build one provider from its settings and an API key
pub fn create_provider(kind: ProviderKind, api_key: String, settings: &ProviderSettings) -> SharedProvider {
    match kind {
        ProviderKind::OpenAI | ProviderKind::Together | ProviderKind::Xai => {
            let mut client = match kind {
                ProviderKind::Together => {
                    OpenAIClient::compatible(kind.as_str(), api_key, openai::TOGETHER_BASE_URL)
                }
                ProviderKind::Xai => OpenAIClient::compatible(kind.as_str(), api_key, openai::XAI_BASE_URL),
                _ => OpenAIClient::new(api_key),
            }
            .with_model(&settings.model)
            .with_rate_limits(settings.rpm, settings.tpm)
            .with_temperature(settings.temperature);
            if let Some(url) = &settings.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        ProviderKind::Anthropic => {
            let mut client = AnthropicClient::new(api_key)
                .with_model(&settings.model)
                .with_rate_limits(settings.rpm, settings.tpm)
                .with_temperature(settings.temperature);
            if let Some(url) = &settings.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        ProviderKind::Gemini => {
            let mut client = GeminiClient::new(api_key)
                .with_model(&settings.model)
                .with_rate_limits(settings.rpm, settings.tpm)
                .with_temperature(settings.temperature);
            if let Some(url) = &settings.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
    }
}

/// Providers constructed once at startup, looked up by kind
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderKind, SharedProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ProviderKind, provider: SharedProvider) {
        self.providers.insert(kind, provider);
    }

    /// Every enabled provider whose API key is present in the environment
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for kind in ProviderKind::all() {
            let settings = config.provider_settings(kind);
            if !settings.enabled {
                continue;
            }
            match std::env::var(kind.api_key_env()) {
                Ok(key) if !key.is_empty() => {
                    registry.register(kind, create_provider(kind, key, &settings));
                }
                _ => tracing::debug!("{} not set, skipping {}", kind.api_key_env(), kind),
            }
        }
        registry
    }

    /// Exactly the requested providers; a missing key is an error
    pub fn with_kinds(config: &Config, kinds: &[ProviderKind]) -> ProviderResult<Self> {
        let mut registry = Self::new();
        for &kind in kinds {
            let key = std::env::var(kind.api_key_env())
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| ProviderError::Config(format!("{} not set", kind.api_key_env())))?;
            registry.register(kind, create_provider(kind, key, &config.provider_settings(kind)));
        }
        Ok(registry)
    }

    pub fn get(&self, kind: ProviderKind) -> ProviderResult<SharedProvider> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProviderError::Config(format!("Provider {} is not registered", kind)))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        assert_eq!("claude".parse(), Ok(ProviderKind::Anthropic));
        assert_eq!("Grok".parse(), Ok(ProviderKind::Xai));
        assert_eq!("google".parse(), Ok(ProviderKind::Gemini));
        assert!("mistral".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_create_provider_uses_settings() {
        let settings = ProviderSettings {
            model: "meta-llama/Llama-3-8b-chat-hf".to_string(),
            ..ProviderSettings::defaults_for(ProviderKind::Together)
        };
        let provider = create_provider(ProviderKind::Together, "key".into(), &settings);

        assert_eq!(provider.name(), "together");
        assert_eq!(provider.default_model(), "meta-llama/Llama-3-8b-chat-hf");
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_empty());

        let settings = ProviderSettings::defaults_for(ProviderKind::Gemini);
        registry.register(
            ProviderKind::Gemini,
            create_provider(ProviderKind::Gemini, "key".into(), &settings),
        );

        assert_eq!(registry.kinds(), vec![ProviderKind::Gemini]);
        assert_eq!(registry.get(ProviderKind::Gemini).unwrap().name(), "gemini");
        assert!(matches!(
            registry.get(ProviderKind::OpenAI),
            Err(ProviderError::Config(_))
        ));
    }
}

//! Configuration management for likert-eval
//!
//! Loads provider, evaluation, prompt and category settings from TOML files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::analysis::SurveyLayout;
use crate::providers::ProviderKind;
use crate::survey::{Category, CategoryError, CategoryTable, ResponseProtocol};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
    /// Column layout of human survey exports
    #[serde(default)]
    pub respondents: SurveyLayout,
}

/// Per-provider settings (`[providers.<name>]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Requests per minute, 0 for unlimited
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// Tokens per minute, 0 for unlimited
    #[serde(default = "default_tpm")]
    pub tpm: u32,
    #[serde(default = "default_temperature", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Overrides `evaluation.max_output_tokens` for this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl ProviderSettings {
    /// Built-in settings for a provider kind
    pub fn defaults_for(kind: ProviderKind) -> Self {
        let (model, base_url, rpm, tpm) = match kind {
            ProviderKind::OpenAI => ("gpt-4o", None, 500, 200_000),
            ProviderKind::Anthropic => ("claude-3-5-sonnet-20241022", None, 50, 40_000),
            ProviderKind::Gemini => ("gemini-1.5-flash", None, 15, 1_000_000),
            ProviderKind::Together => (
                "meta-llama/Llama-3.3-70B-Instruct-Turbo",
                Some(crate::providers::openai::TOGETHER_BASE_URL),
                600,
                180_000,
            ),
            ProviderKind::Xai => (
                "grok-beta",
                Some(crate::providers::openai::XAI_BASE_URL),
                60,
                100_000,
            ),
        };

        Self {
            enabled: true,
            model: model.to_string(),
            base_url: base_url.map(str::to_string),
            rpm,
            tpm,
            temperature: default_temperature(),
            max_output_tokens: None,
        }
    }
}

/// Run settings (`[evaluation]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Trials per question
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallel_requests")]
    pub parallel_requests: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Re-issues of a single trial whose output did not parse
    #[serde(default = "default_parse_retries")]
    pub parse_retries: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Fixed seed for backoff jitter; unset draws from entropy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_seed: Option<u64>,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

/// Prompt settings (`[prompt]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default)]
    pub protocol: ResponseProtocol,
    /// Replaces the protocol's built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// User prompt template; `{statement}` is replaced by the question text
    #[serde(default = "default_user_template")]
    pub user_template: String,
}

impl PromptConfig {
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or_else(|| self.protocol.default_system_prompt())
    }
}

/// One `[[categories]]` entry: explicit `ids`, or a `start`/`end` range.
/// A missing `end` runs to the last question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u32>,
}

impl CategoryConfig {
    pub fn range(name: &str, start: u32, end: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            ids: Vec::new(),
            start: Some(start),
            end,
        }
    }

    pub fn resolve(&self, total_questions: u32) -> Result<Category, CategoryError> {
        if !self.ids.is_empty() {
            return Ok(Category::new(&self.name, self.ids.iter().copied()));
        }
        match self.start {
            Some(start) => Ok(Category::range(
                &self.name,
                start,
                self.end.unwrap_or(total_questions),
            )),
            None => Err(CategoryError::MissingSelector(self.name.clone())),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_rpm() -> u32 { 60 }
fn default_tpm() -> u32 { 100_000 }
fn default_temperature() -> Option<f32> { Some(1.0) }
fn default_iterations() -> u32 { 5 }
fn default_parallel_requests() -> usize { 8 }
fn default_max_retries() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 2_000 }
fn default_timeout_ms() -> u64 { 60_000 }
fn default_parse_retries() -> u32 { 2 }
fn default_max_output_tokens() -> u32 { 200 }
fn default_output_dir() -> String { "results".to_string() }
fn default_user_template() -> String { "{statement}".to_string() }

/// Category slices of the CES questionnaire
fn default_categories() -> Vec<CategoryConfig> {
    vec![
        CategoryConfig::range("active", 1, Some(5)),
        CategoryConfig::range("passive", 6, Some(11)),
        CategoryConfig::range("questionable", 12, Some(16)),
        CategoryConfig::range("no harm", 17, Some(21)),
        CategoryConfig::range("downloading", 22, Some(23)),
        CategoryConfig::range("recycling", 24, Some(27)),
        CategoryConfig::range("doing good", 28, None),
    ]
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            parallel_requests: default_parallel_requests(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_ms: default_timeout_ms(),
            parse_retries: default_parse_retries(),
            max_output_tokens: default_max_output_tokens(),
            jitter_seed: None,
            output_dir: default_output_dir(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            protocol: ResponseProtocol::default(),
            system_prompt: None,
            user_template: default_user_template(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let providers = ProviderKind::all()
            .into_iter()
            .map(|kind| (kind.as_str().to_string(), ProviderSettings::defaults_for(kind)))
            .collect();

        Self {
            providers,
            evaluation: EvaluationConfig::default(),
            prompt: PromptConfig::default(),
            categories: default_categories(),
            respondents: SurveyLayout::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from default config location or return defaults
    pub fn load_or_default() -> Self {
        let config_paths = ["config/models.toml", "likert-eval/config/models.toml"];

        for path in &config_paths {
            match Self::from_file(path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path);
                    return config;
                }
                Err(ConfigError::Io(_)) => continue,
                Err(e) => tracing::warn!("Ignoring {}: {}", path, e),
            }
        }

        tracing::info!("Using default configuration");
        Self::default()
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for name in self.providers.keys() {
            name.parse::<ProviderKind>().map_err(ConfigError::Invalid)?;
        }
        if self.evaluation.iterations == 0 {
            return Err(ConfigError::Invalid("evaluation.iterations must be at least 1".into()));
        }
        if self.evaluation.parallel_requests == 0 {
            return Err(ConfigError::Invalid(
                "evaluation.parallel_requests must be at least 1".into(),
            ));
        }
        // counts the first dispatch, so 0 would still make one attempt
        if self.evaluation.max_retries == 0 {
            return Err(ConfigError::Invalid("evaluation.max_retries must be at least 1".into()));
        }
        if !self.prompt.user_template.contains("{statement}") {
            return Err(ConfigError::Invalid(
                "prompt.user_template must contain {statement}".into(),
            ));
        }
        Ok(())
    }

    /// Settings for a provider, falling back to built-in defaults
    pub fn provider_settings(&self, kind: ProviderKind) -> ProviderSettings {
        self.providers
            .get(kind.as_str())
            .cloned()
            .unwrap_or_else(|| ProviderSettings::defaults_for(kind))
    }

    /// Resolve and validate the category partition for `total_questions`
    pub fn category_table(&self, total_questions: u32) -> Result<CategoryTable, CategoryError> {
        let categories = self
            .categories
            .iter()
            .map(|c| c.resolve(total_questions))
            .collect::<Result<Vec<_>, _>>()?;
        CategoryTable::new(categories, total_questions)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

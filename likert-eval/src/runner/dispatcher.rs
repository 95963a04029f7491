//! Concurrent question × iteration dispatch with whole-batch retries
//!
//! Every `(question, iteration)` pair is one independent provider call. A
//! dispatch attempt streams the pending pairs through a bounded pool; results
//! merge into an ordered map as they complete. Retryable failures send only
//! the unfinished pairs into the next attempt after a backoff sleep. A fatal
//! failure returns immediately, dropping the calls still in flight.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::Config;
use crate::providers::{LLMProvider, ProviderError, SharedProvider};
use crate::runner::retry::{Backoff, FailureClass, RetryController};
use crate::survey::{ParseError, Question, ResponseParser, ResponseRecord, Trial, TrialKey};

/// Placeholder replaced by the statement text in user templates
pub const STATEMENT_PLACEHOLDER: &str = "{statement}";

/// Configuration for the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Concurrent provider calls
    pub parallel_requests: usize,
    /// Dispatch attempts over the whole batch, the first one included
    pub max_retries: u32,
    /// Base of the exponential backoff
    pub base_delay_ms: u64,
    /// Per-call timeout, excluding the provider's pacing wait; expiry counts as retryable
    pub timeout_ms: u64,
    /// Re-issues of one trial whose output did not parse
    pub parse_retries: u32,
    pub max_output_tokens: u32,
    pub jitter_seed: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            parallel_requests: 8,
            max_retries: 3,
            base_delay_ms: 2_000,
            timeout_ms: 60_000,
            parse_retries: 2,
            max_output_tokens: 200,
            jitter_seed: None,
        }
    }
}

impl From<&crate::config::EvaluationConfig> for DispatchConfig {
    fn from(eval: &crate::config::EvaluationConfig) -> Self {
        Self {
            parallel_requests: eval.parallel_requests,
            max_retries: eval.max_retries,
            base_delay_ms: eval.base_delay_ms,
            timeout_ms: eval.timeout_ms,
            parse_retries: eval.parse_retries,
            max_output_tokens: eval.max_output_tokens,
            jitter_seed: eval.jitter_seed,
        }
    }
}

/// A trial whose output never parsed into a rating
#[derive(Debug, Clone, PartialEq)]
pub struct MissingTrial {
    pub key: TrialKey,
    pub question: String,
    pub error: ParseError,
    pub raw_text: String,
}

/// Terminal dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No questions to dispatch")]
    NoQuestions,

    #[error("Iteration count must be at least 1")]
    NoIterations,

    #[error("Fatal error on question {question_id}, iteration {iteration} (attempt {attempt}): {source}")]
    Fatal {
        question_id: u32,
        iteration: u32,
        question: String,
        attempt: u32,
        #[source]
        source: ProviderError,
    },

    #[error("Gave up after {attempts} attempts with {} trials unfinished: {last_error}", .unfinished.len())]
    MaxRetriesExceeded {
        attempts: u32,
        unfinished: Vec<TrialKey>,
        #[source]
        last_error: ProviderError,
    },

    #[error("{} trials produced no parseable rating", .missing.len())]
    MissingTrials { missing: Vec<MissingTrial> },
}

/// Output of a complete run
#[derive(Debug, Clone)]
pub struct EvaluationRun {
    /// One record per `(question, iteration)`, sorted by that pair
    pub records: Vec<ResponseRecord>,
    /// Dispatch attempts made (1 when nothing had to be retried)
    pub attempts: u32,
    /// Backoff sleeps between attempts, in order
    pub backoff_delays: Vec<Duration>,
}

enum TrialOutcome {
    Parsed(ResponseRecord),
    Unparseable(MissingTrial),
    Failed(TrialKey, ProviderError),
}

/// Fans trials out to one provider and collects parsed records
pub struct Dispatcher {
    config: DispatchConfig,
    parser: ResponseParser,
    system_prompt: String,
    user_template: String,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, parser: ResponseParser) -> Self {
        Self {
            config,
            parser,
            system_prompt: parser.protocol().default_system_prompt().to_string(),
            user_template: STATEMENT_PLACEHOLDER.to_string(),
        }
    }

    /// Dispatcher with evaluation and prompt settings from `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            DispatchConfig::from(&config.evaluation),
            ResponseParser::new(config.prompt.protocol),
        )
        .with_system_prompt(config.prompt.system_prompt())
        .with_user_template(&config.prompt.user_template)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_user_template(mut self, template: impl Into<String>) -> Self {
        self.user_template = template.into();
        self
    }

    /// Per-call output budget, overriding the evaluation default
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.config.max_output_tokens = max_output_tokens;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn render_user_prompt(&self, statement: &str) -> String {
        self.user_template.replace(STATEMENT_PLACEHOLDER, statement)
    }

    /// Collect `iterations` ratings for every question
    pub async fn run(
        &self,
        questions: &[Question],
        iterations: u32,
        provider: SharedProvider,
    ) -> Result<EvaluationRun, DispatchError> {
        if questions.is_empty() {
            return Err(DispatchError::NoQuestions);
        }
        if iterations == 0 {
            return Err(DispatchError::NoIterations);
        }

        let by_id: BTreeMap<u32, &Question> = questions.iter().map(|q| (q.id, q)).collect();
        let mut controller = RetryController::new(
            self.config.max_retries,
            Backoff::new(Duration::from_millis(self.config.base_delay_ms)),
            self.config.jitter_seed,
        );

        let mut records: BTreeMap<TrialKey, ResponseRecord> = BTreeMap::new();
        let mut missing: BTreeMap<TrialKey, MissingTrial> = BTreeMap::new();
        let mut pending = TrialKey::all(questions, iterations);

        tracing::info!(
            "Dispatching {} questions x {} iterations to {} ({})",
            questions.len(),
            iterations,
            provider.name(),
            provider.default_model()
        );

        loop {
            let attempt = controller.attempt();
            tracing::info!("Attempt {}: {} trials pending", attempt, pending.len());

            let mut unfinished: Vec<TrialKey> = Vec::new();
            let mut last_error: Option<ProviderError> = None;

            let mut outcomes = stream::iter(pending.iter().map(|key| {
                let question = by_id[&key.question_id];
                self.run_trial(provider.as_ref(), *key, question)
            }))
            .buffer_unordered(self.config.parallel_requests.max(1));

            while let Some(outcome) = outcomes.next().await {
                match outcome {
                    TrialOutcome::Parsed(record) => {
                        records.insert(record.key(), record);
                    }
                    TrialOutcome::Unparseable(trial) => {
                        missing.insert(trial.key, trial);
                    }
                    TrialOutcome::Failed(key, error) => match FailureClass::of(&error) {
                        FailureClass::Retryable => {
                            tracing::warn!("Retryable failure on {}: {}", key, error);
                            unfinished.push(key);
                            last_error = Some(error);
                        }
                        FailureClass::Fatal => {
                            tracing::error!("Fatal failure on {} (attempt {}): {}", key, attempt, error);
                            return Err(DispatchError::Fatal {
                                question_id: key.question_id,
                                iteration: key.iteration,
                                question: by_id[&key.question_id].text.clone(),
                                attempt,
                                source: error,
                            });
                        }
                    },
                }
            }
            drop(outcomes);

            let Some(last_error) = last_error else {
                break;
            };

            unfinished.sort();
            match controller.on_retryable() {
                Some(delay) => {
                    tracing::warn!(
                        "{} trials unfinished, retry {} in {}ms",
                        unfinished.len(),
                        controller.retries(),
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    pending = unfinished;
                }
                None => {
                    tracing::error!(
                        "Retry budget of {} spent with {} trials unfinished",
                        self.config.max_retries,
                        unfinished.len()
                    );
                    return Err(DispatchError::MaxRetriesExceeded {
                        attempts: controller.attempts(),
                        unfinished,
                        last_error,
                    });
                }
            }
        }

        if !missing.is_empty() {
            tracing::error!("{} trials never produced a parseable rating", missing.len());
            return Err(DispatchError::MissingTrials {
                missing: missing.into_values().collect(),
            });
        }

        let attempts = controller.attempts();
        tracing::info!("Collected {} records in {} attempts", records.len(), attempts);

        Ok(EvaluationRun {
            records: records.into_values().collect(),
            attempts,
            backoff_delays: controller.into_delays(),
        })
    }

    async fn run_trial(&self, provider: &dyn LLMProvider, key: TrialKey, question: &Question) -> TrialOutcome {
        let user_prompt = self.render_user_prompt(&question.text);
        let mut last_parse: Option<(ParseError, String)> = None;

        for parse_attempt in 0..=self.config.parse_retries {
            // Pacing waits are not stalls; only the call itself is timed
            provider.pace().await;
            let call = provider.call(&self.system_prompt, &user_prompt, self.config.max_output_tokens);
            let raw_text = match tokio::time::timeout(Duration::from_millis(self.config.timeout_ms), call).await {
                Ok(Ok(text)) => text,
                Ok(Err(error)) => return TrialOutcome::Failed(key, error),
                Err(_) => {
                    return TrialOutcome::Failed(
                        key,
                        ProviderError::Timeout {
                            timeout_ms: self.config.timeout_ms,
                        },
                    )
                }
            };

            match self.parser.parse_response(&raw_text) {
                Ok(parsed) => {
                    tracing::debug!("{} -> {}", key, parsed.value);
                    let trial = Trial {
                        question_id: key.question_id,
                        iteration: key.iteration,
                        raw_text,
                    };
                    return TrialOutcome::Parsed(ResponseRecord::from_trial(trial, &question.text, parsed));
                }
                Err(error) => {
                    tracing::warn!(
                        "Unparseable output for {} (try {}/{}): {}",
                        key,
                        parse_attempt + 1,
                        self.config.parse_retries + 1,
                        error
                    );
                    last_parse = Some((error, raw_text));
                }
            }
        }

        let (error, raw_text) = last_parse.unwrap_or_else(|| (ParseError::Format(String::new()), String::new()));
        TrialOutcome::Unparseable(MissingTrial {
            key,
            question: question.text.clone(),
            error,
            raw_text,
        })
    }
}

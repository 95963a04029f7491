//! Likert survey evaluation for LLM providers
//!
//! Runs a questionnaire of Likert-scale statements against an LLM provider
//! several times per statement, aggregates the ratings, and compares them
//! per category against human reference groups with one-way ANOVA and
//! Tukey HSD.
//!
//! # Features
//!
//! - OpenAI, Anthropic, Gemini, Together and xAI providers
//! - Concurrent dispatch with rate limiting and whole-batch retries
//! - Strict parsing of single-digit ratings, optionally with a rationale
//! - Raw and summary CSV record sets
//! - Per-category statistical comparison with human baselines
//! - JSON reports with plot-ready figure data
//!
//! # Example
//!
//! ```no_run
//! use likert_eval::{
//!     analysis::summarize,
//!     config::Config,
//!     providers::{ProviderKind, ProviderRegistry},
//!     runner::Dispatcher,
//!     survey::parse_questions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let registry = ProviderRegistry::with_kinds(&config, &[ProviderKind::OpenAI])?;
//!     let provider = registry.get(ProviderKind::OpenAI)?;
//!
//!     let questions = parse_questions("1. Keeping extra change.\n2. Recycling cans.\n");
//!     let run = Dispatcher::from_config(&config)
//!         .run(&questions, 5, provider)
//!         .await?;
//!
//!     let stats = summarize(&run.records, questions.len() as u32, 5)?;
//!     println!("{:?}", stats);
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod providers;
pub mod records;
pub mod reporting;
pub mod runner;
pub mod survey;

pub use config::Config;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::analysis::{
        summarize, CategoryComparator, ComparisonResult, HumanBaseline, ModelScores, SummaryStat,
    };
    pub use crate::config::Config;
    pub use crate::providers::{
        create_provider, CompletionRequest, CompletionResponse, LLMProvider, Message,
        ProviderError, ProviderKind, ProviderRegistry, ProviderResult, SharedProvider,
    };
    pub use crate::records::{read_raw_csv, write_raw_csv, write_summary_csv, RecordError};
    pub use crate::reporting::{
        print_console_report, EvaluationReport, JsonReportSink, ReportSink, RunLabeler,
    };
    pub use crate::runner::{DispatchConfig, DispatchError, Dispatcher, EvaluationRun};
    pub use crate::survey::{
        Category, CategoryTable, Question, ResponseParser, ResponseProtocol, ResponseRecord,
        TrialKey,
    };
}

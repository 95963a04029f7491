//! Survey data model: questions, trials and parsed response records

pub mod categories;
pub mod loader;
pub mod parser;

pub use categories::{Category, CategoryError, CategoryTable};
pub use loader::{load_questions_from_file, parse_questions, LoadError};
pub use parser::{ParseError, ParsedResponse, ResponseParser, ResponseProtocol};

use serde::{Deserialize, Serialize};

/// Lowest accepted Likert rating
pub const LIKERT_MIN: u8 = 1;
/// Highest accepted Likert rating
pub const LIKERT_MAX: u8 = 5;

/// A survey statement with its stable 1-based position in the questionnaire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    pub text: String,
}

impl Question {
    pub fn new(id: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// Identifies one trial. The derived ordering is the canonical record order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrialKey {
    pub question_id: u32,
    pub iteration: u32,
}

impl TrialKey {
    pub fn new(question_id: u32, iteration: u32) -> Self {
        Self {
            question_id,
            iteration,
        }
    }

    /// Every `(question, iteration)` pair of a run, in canonical order
    pub fn all(questions: &[Question], iterations: u32) -> Vec<TrialKey> {
        questions
            .iter()
            .flat_map(|q| (0..iterations).map(move |j| TrialKey::new(q.id, j)))
            .collect()
    }
}

impl std::fmt::Display for TrialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}#{}", self.question_id, self.iteration)
    }
}

/// Raw output of one successful provider call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    pub question_id: u32,
    pub iteration: u32,
    pub raw_text: String,
}

impl Trial {
    pub fn key(&self) -> TrialKey {
        TrialKey::new(self.question_id, self.iteration)
    }
}

/// A trial whose raw text parsed into a valid rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub question_id: u32,
    pub question: String,
    pub iteration: u32,
    pub raw_text: String,
    pub response: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl ResponseRecord {
    pub fn from_trial(trial: Trial, question: &str, parsed: ParsedResponse) -> Self {
        Self {
            question_id: trial.question_id,
            question: question.to_string(),
            iteration: trial.iteration,
            raw_text: trial.raw_text,
            response: parsed.value,
            rationale: parsed.rationale,
        }
    }

    pub fn key(&self) -> TrialKey {
        TrialKey::new(self.question_id, self.iteration)
    }
}

//! Question list loading from line-oriented questionnaire documents
//!
//! A line is a question when it has one of two shapes:
//!
//! - `"<ordinal>. <text>"` (numbered list item)
//! - `"- <text>"` (bullet list item)
//!
//! Everything else (headings, blank lines, prose) is skipped. Questions are
//! numbered by their position in the file, starting at 1.

use std::path::Path;

use super::Question;

/// Error type for question loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No questions found in {0}")]
    Empty(String),
}

/// Load questions from a questionnaire file
pub fn load_questions_from_file(path: impl AsRef<Path>) -> Result<Vec<Question>, LoadError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let questions = parse_questions(&content);

    if questions.is_empty() {
        return Err(LoadError::Empty(path.display().to_string()));
    }

    tracing::info!("Loaded {} questions from {}", questions.len(), path.display());
    Ok(questions)
}

/// Extract questions from questionnaire text, in document order
pub fn parse_questions(content: &str) -> Vec<Question> {
    content
        .lines()
        .filter_map(question_text)
        .enumerate()
        .map(|(idx, text)| Question::new(idx as u32 + 1, text))
        .collect()
}

fn question_text(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(text) = line.strip_prefix("- ") {
        return non_empty(text);
    }

    let (ordinal, text) = line.split_once(". ")?;
    if ordinal.is_empty() || !ordinal.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    non_empty(text)
}

fn non_empty(text: &str) -> Option<&str> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

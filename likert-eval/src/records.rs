//! Tabular record sets: raw responses and per-question summaries as CSV

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

use crate::analysis::SummaryStat;
use crate::survey::{ResponseRecord, LIKERT_MAX, LIKERT_MIN};

/// Errors reading or writing record sets
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Row {row}: {message}")]
    InvalidValue { row: usize, message: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct RawRow {
    #[serde(rename = "#")]
    question_id: u32,
    #[serde(rename = "Question")]
    question: String,
    #[serde(rename = "Iteration")]
    iteration: u32,
    #[serde(rename = "Response")]
    response: String,
}

#[derive(Debug, Serialize)]
struct SummaryRow {
    #[serde(rename = "#")]
    question_id: u32,
    #[serde(rename = "Average")]
    average: f64,
    std: f64,
}

/// Write raw records with header `#,Question,Iteration,Response`
pub fn write_raw_records<W: Write>(writer: W, records: &[ResponseRecord]) -> Result<(), RecordError> {
    let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv.write_record(["#", "Question", "Iteration", "Response"])?;
    for record in records {
        csv.serialize(RawRow {
            question_id: record.question_id,
            question: record.question.clone(),
            iteration: record.iteration,
            response: record.response.to_string(),
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_raw_csv(path: impl AsRef<Path>, records: &[ResponseRecord]) -> Result<(), RecordError> {
    let file = create_file(path.as_ref())?;
    write_raw_records(file, records)?;
    tracing::info!("Wrote {} raw records to {}", records.len(), path.as_ref().display());
    Ok(())
}

/// Read raw records back; every response must be an integer rating in range
pub fn read_raw_records<R: Read>(reader: R) -> Result<Vec<ResponseRecord>, RecordError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = csv.headers()?.clone();
    for column in ["#", "Question", "Iteration", "Response"] {
        if !headers.iter().any(|h| h == column) {
            return Err(RecordError::MissingColumn(column.to_string()));
        }
    }

    let mut records = Vec::new();
    for (idx, row) in csv.deserialize::<RawRow>().enumerate() {
        let row = row?;
        let response = match row.response.parse::<u8>() {
            Ok(v) if (LIKERT_MIN..=LIKERT_MAX).contains(&v) => v,
            _ => {
                return Err(RecordError::InvalidValue {
                    row: idx + 2,
                    message: format!("response {:?} is not a rating 1-5", row.response),
                })
            }
        };
        records.push(ResponseRecord {
            question_id: row.question_id,
            question: row.question,
            iteration: row.iteration,
            raw_text: row.response,
            response,
            rationale: None,
        });
    }
    Ok(records)
}

pub fn read_raw_csv(path: impl AsRef<Path>) -> Result<Vec<ResponseRecord>, RecordError> {
    let file = std::fs::File::open(path.as_ref())?;
    read_raw_records(file)
}

/// Write per-question summaries with header `#,Average,std`
pub fn write_summary<W: Write>(writer: W, stats: &[SummaryStat]) -> Result<(), RecordError> {
    let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv.write_record(["#", "Average", "std"])?;
    for stat in stats {
        csv.serialize(SummaryRow {
            question_id: stat.question_id,
            average: stat.mean,
            std: stat.std,
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_summary_csv(path: impl AsRef<Path>, stats: &[SummaryStat]) -> Result<(), RecordError> {
    let file = create_file(path.as_ref())?;
    write_summary(file, stats)?;
    tracing::info!("Wrote {} summary rows to {}", stats.len(), path.as_ref().display());
    Ok(())
}

/// `(question count, iteration count)` implied by a record set's largest ids
pub fn infer_dimensions(records: &[ResponseRecord]) -> (u32, u32) {
    let questions = records.iter().map(|r| r.question_id).max().unwrap_or(0);
    let iterations = records.iter().map(|r| r.iteration + 1).max().unwrap_or(0);
    (questions, iterations)
}

fn create_file(path: &Path) -> Result<std::fs::File, RecordError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(std::fs::File::create(path)?)
}

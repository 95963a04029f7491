//! Per-question aggregation of raw response records

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::survey::{ResponseRecord, TrialKey};

/// Mean, sample std and count of one question's responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStat {
    pub question_id: u32,
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

/// Record sets that cannot be aggregated
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    #[error("Duplicate record for {0}")]
    Duplicate(TrialKey),

    #[error("Missing record for {0}")]
    Missing(TrialKey),

    #[error("Unexpected record {0} outside questions 1..={1} and iterations 0..{2}")]
    Unexpected(TrialKey, u32, u32),
}

/// Arithmetic mean; NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (`n - 1`); 0 when there are fewer than two values
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Population standard deviation (`n`); NaN for an empty slice
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / values.len() as f64).sqrt()
}

/// Check that `records` hold exactly one entry per `(question, iteration)`
/// for questions `1..=n_questions` and iterations `0..iterations`.
pub fn verify_complete(
    records: &[ResponseRecord],
    n_questions: u32,
    iterations: u32,
) -> Result<(), AggregateError> {
    let mut seen: BTreeSet<TrialKey> = BTreeSet::new();

    for record in records {
        let key = record.key();
        if key.question_id == 0 || key.question_id > n_questions || key.iteration >= iterations {
            return Err(AggregateError::Unexpected(key, n_questions, iterations));
        }
        if !seen.insert(key) {
            return Err(AggregateError::Duplicate(key));
        }
    }

    for question_id in 1..=n_questions {
        for iteration in 0..iterations {
            let key = TrialKey::new(question_id, iteration);
            if !seen.contains(&key) {
                return Err(AggregateError::Missing(key));
            }
        }
    }

    Ok(())
}

/// Per-question statistics in ascending question order.
///
/// Values are summed in iteration order regardless of record order, so the
/// result is bit-identical for any permutation of the same record set.
pub fn summarize(
    records: &[ResponseRecord],
    n_questions: u32,
    iterations: u32,
) -> Result<Vec<SummaryStat>, AggregateError> {
    verify_complete(records, n_questions, iterations)?;

    let mut grouped: BTreeMap<u32, BTreeMap<u32, f64>> = BTreeMap::new();
    for record in records {
        grouped
            .entry(record.question_id)
            .or_default()
            .insert(record.iteration, record.response as f64);
    }

    Ok(grouped
        .into_iter()
        .map(|(question_id, by_iteration)| {
            let values: Vec<f64> = by_iteration.into_values().collect();
            SummaryStat {
                question_id,
                mean: mean(&values),
                std: sample_std(&values),
                count: values.len(),
            }
        })
        .collect())
}

//! Per-category comparison of model responses against human baselines

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;

use super::aggregate::{mean, population_std};
use super::baseline::HumanBaseline;
use super::stats::{one_way_anova, tukey_hsd, TukeyTable};
use crate::survey::{Category, CategoryTable, ResponseRecord};

/// Whether the statistics could be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Computed,
    /// Fewer than two non-empty groups
    InsufficientData,
}

/// ANOVA and Tukey results for one category. NaN values serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub category: String,
    pub status: ComparisonStatus,
    pub f_statistic: f64,
    pub p_value: f64,
    pub group_means: IndexMap<String, f64>,
    pub group_stds: IndexMap<String, f64>,
    pub group_sizes: IndexMap<String, usize>,
    pub tukey: Option<TukeyTable>,
}

impl ComparisonResult {
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.status == ComparisonStatus::Computed && self.p_value < alpha
    }
}

/// All raw responses of one model, keyed by question
#[derive(Debug, Clone, PartialEq)]
pub struct ModelScores {
    pub name: String,
    responses: BTreeMap<u32, Vec<f64>>,
}

impl ModelScores {
    pub fn from_records(name: impl Into<String>, records: &[ResponseRecord]) -> Self {
        let mut by_question: BTreeMap<u32, BTreeMap<u32, f64>> = BTreeMap::new();
        for record in records {
            by_question
                .entry(record.question_id)
                .or_default()
                .insert(record.iteration, record.response as f64);
        }
        Self {
            name: name.into(),
            responses: by_question
                .into_iter()
                .map(|(id, values)| (id, values.into_values().collect()))
                .collect(),
        }
    }

    /// Responses for the category's questions, flattened in question order
    pub fn values_for(&self, category: &Category) -> Vec<f64> {
        category
            .question_ids
            .iter()
            .filter_map(|id| self.responses.get(id))
            .flatten()
            .copied()
            .collect()
    }
}

/// Builds groups per category and runs ANOVA + Tukey HSD over them
#[derive(Debug, Clone, Copy)]
pub struct CategoryComparator {
    alpha: f64,
}

impl Default for CategoryComparator {
    fn default() -> Self {
        Self { alpha: 0.05 }
    }
}

impl CategoryComparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alpha(alpha: f64) -> Self {
        Self { alpha }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Baseline groups first, in load order, then one group per model. A
    /// respondent group contributes every answer, a reference group one
    /// mean per question.
    pub fn assemble_groups(
        &self,
        category: &Category,
        baseline: &HumanBaseline,
        models: &[ModelScores],
    ) -> IndexMap<String, Vec<f64>> {
        let mut groups: IndexMap<String, Vec<f64>> = IndexMap::new();

        for name in baseline.group_names() {
            groups.insert(
                name.to_string(),
                baseline.scores_for(name, category.question_ids.iter().copied()),
            );
        }
        for model in models {
            if groups.contains_key(&model.name) {
                tracing::warn!(
                    "Model '{}' shares a name with a baseline group; the model's values replace it",
                    model.name
                );
            }
            groups.insert(model.name.clone(), model.values_for(category));
        }

        groups
    }

    /// Statistics over already-assembled groups
    pub fn compare_groups(&self, category: &str, groups: &IndexMap<String, Vec<f64>>) -> ComparisonResult {
        let non_empty: IndexMap<&String, &Vec<f64>> =
            groups.iter().filter(|(_, values)| !values.is_empty()).collect();

        let group_means = non_empty.iter().map(|(k, v)| (k.to_string(), mean(v))).collect();
        let group_stds = non_empty
            .iter()
            .map(|(k, v)| (k.to_string(), population_std(v)))
            .collect();
        let group_sizes = non_empty.iter().map(|(k, v)| (k.to_string(), v.len())).collect();

        if non_empty.len() < 2 {
            tracing::debug!("Category '{}' has {} non-empty groups, skipping tests", category, non_empty.len());
            return ComparisonResult {
                category: category.to_string(),
                status: ComparisonStatus::InsufficientData,
                f_statistic: f64::NAN,
                p_value: f64::NAN,
                group_means,
                group_stds,
                group_sizes,
                tukey: None,
            };
        }

        let slices: Vec<&[f64]> = non_empty.values().map(|v| v.as_slice()).collect();
        let anova = one_way_anova(&slices);
        let tukey = tukey_hsd(groups, self.alpha);

        ComparisonResult {
            category: category.to_string(),
            status: ComparisonStatus::Computed,
            f_statistic: anova.map(|a| a.f_statistic).unwrap_or(f64::NAN),
            p_value: anova.map(|a| a.p_value).unwrap_or(f64::NAN),
            group_means,
            group_stds,
            group_sizes,
            tukey,
        }
    }

    /// One result per category, in table order
    pub fn compare(
        &self,
        table: &CategoryTable,
        baseline: &HumanBaseline,
        models: &[ModelScores],
    ) -> Vec<ComparisonResult> {
        table
            .iter()
            .map(|category| {
                let groups = self.assemble_groups(category, baseline, models);
                let result = self.compare_groups(&category.name, &groups);
                tracing::info!(
                    "Category '{}': F={:.4} p={:.4}",
                    result.category,
                    result.f_statistic,
                    result.p_value
                );
                result
            })
            .collect()
    }
}

//! Plot-ready figure data. Rendering is left to whoever consumes the report.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::{HumanBaseline, SummaryStat};
use crate::survey::{CategoryTable, ResponseRecord};

/// Data behind one chart
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Figure {
    CategoryBars(CategoryBars),
    Heatmap(Heatmap),
}

/// Grouped bars for one category: run average next to each baseline group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryBars {
    pub label: String,
    /// Series names; the first is the run, the rest baseline groups
    pub series: Vec<String>,
    pub rows: Vec<BarRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarRow {
    pub question_id: u32,
    /// One value per series; `None` where a baseline has no score
    pub values: Vec<Option<f64>>,
    /// Error bar on the run's value (sample std across iterations)
    pub error: f64,
}

/// Iteration x question grid of raw responses
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heatmap {
    pub title: String,
    pub iterations: Vec<u32>,
    pub question_ids: Vec<u32>,
    /// `cells[i][q]` is the response of iteration `iterations[i]` to `question_ids[q]`
    pub cells: Vec<Vec<Option<u8>>>,
}

/// One bar chart per category, in table order
pub fn category_bars(
    table: &CategoryTable,
    stats: &[SummaryStat],
    baseline: &HumanBaseline,
    run_label: &str,
) -> Vec<Figure> {
    let by_id: BTreeMap<u32, &SummaryStat> = stats.iter().map(|s| (s.question_id, s)).collect();

    let mut series = vec![run_label.to_string()];
    series.extend(baseline.group_names().into_iter().map(str::to_string));

    table
        .iter()
        .map(|category| {
            let rows = category
                .question_ids
                .iter()
                .filter_map(|id| by_id.get(id))
                .map(|stat| {
                    let mut values = vec![Some(stat.mean)];
                    values.extend(
                        baseline
                            .group_names()
                            .into_iter()
                            .map(|group| baseline.value(group, stat.question_id)),
                    );
                    BarRow {
                        question_id: stat.question_id,
                        values,
                        error: stat.std,
                    }
                })
                .collect();

            Figure::CategoryBars(CategoryBars {
                label: category.name.clone(),
                series: series.clone(),
                rows,
            })
        })
        .collect()
}

/// Pivot raw records into an iteration x question grid
pub fn heatmap(records: &[ResponseRecord], title: impl Into<String>) -> Figure {
    let iterations: BTreeSet<u32> = records.iter().map(|r| r.iteration).collect();
    let question_ids: BTreeSet<u32> = records.iter().map(|r| r.question_id).collect();
    let lookup: BTreeMap<(u32, u32), u8> = records
        .iter()
        .map(|r| ((r.iteration, r.question_id), r.response))
        .collect();

    let cells = iterations
        .iter()
        .map(|i| {
            question_ids
                .iter()
                .map(|q| lookup.get(&(*i, *q)).copied())
                .collect()
        })
        .collect();

    Figure::Heatmap(Heatmap {
        title: title.into(),
        iterations: iterations.into_iter().collect(),
        question_ids: question_ids.into_iter().collect(),
        cells,
    })
}

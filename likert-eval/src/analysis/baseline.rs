//! Human reference scores per question
//!
//! Two file shapes are read:
//!
//! - reference tables: a `#` column holding the question id and one column
//!   per human group, e.g. `#,students,non-students`, one mean per cell
//! - survey exports: one row per respondent and one column per question,
//!   mapped to question ids by a [`SurveyLayout`]

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use super::aggregate::{mean, SummaryStat};
use crate::records::RecordError;

/// Human scores per group and question. A reference-table group holds one
/// mean per question; a respondent group holds every answer given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HumanBaseline {
    groups: IndexMap<String, BTreeMap<u32, Vec<f64>>>,
}

/// How a survey export maps onto the questionnaire (`[respondents]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyLayout {
    /// Group name the respondents are reported under
    #[serde(default = "default_group")]
    pub group: String,
    /// Question columns in questionnaire order; column `i` holds question
    /// `i + 1`. Empty takes every column in file order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Rows after the header that are not answers, e.g. question wording
    #[serde(default)]
    pub skip_rows: usize,
}

fn default_group() -> String {
    "Human".to_string()
}

impl Default for SurveyLayout {
    fn default() -> Self {
        Self {
            group: default_group(),
            columns: Vec::new(),
            skip_rows: 0,
        }
    }
}

/// A summary row joined with the reference columns for the same question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedSummaryRow {
    pub question_id: u32,
    pub mean: f64,
    pub std: f64,
    pub references: IndexMap<String, f64>,
}

impl HumanBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one group's per-question means
    pub fn insert_group(&mut self, name: impl Into<String>, scores: impl IntoIterator<Item = (u32, f64)>) {
        self.groups
            .insert(name.into(), scores.into_iter().map(|(id, v)| (id, vec![v])).collect());
    }

    /// Add or replace one group's individual answers per question
    pub fn insert_respondents(
        &mut self,
        name: impl Into<String>,
        responses: impl IntoIterator<Item = (u32, Vec<f64>)>,
    ) {
        self.groups.insert(name.into(), responses.into_iter().collect());
    }

    /// Take over every group of `other`, replacing same-named ones
    pub fn merge(&mut self, other: HumanBaseline) {
        for (name, scores) in other.groups {
            if self.groups.contains_key(&name) {
                tracing::warn!("Baseline group '{}' loaded twice; keeping the later one", name);
            }
            self.groups.insert(name, scores);
        }
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let file = std::fs::File::open(path.as_ref())?;
        let baseline = Self::from_csv_reader(file)?;
        tracing::info!(
            "Loaded {} reference groups from {}",
            baseline.groups.len(),
            path.as_ref().display()
        );
        Ok(baseline)
    }

    /// Parse a reference table. Empty cells are skipped.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, RecordError> {
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = csv.headers()?.clone();

        let id_col = headers
            .iter()
            .position(|h| h == "#")
            .ok_or_else(|| RecordError::MissingColumn("#".to_string()))?;
        let group_cols: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(idx, name)| *idx != id_col && !name.is_empty())
            .map(|(idx, name)| (idx, name.to_string()))
            .collect();

        let mut groups: IndexMap<String, BTreeMap<u32, Vec<f64>>> = group_cols
            .iter()
            .map(|(_, name)| (name.clone(), BTreeMap::new()))
            .collect();

        for (row_idx, row) in csv.records().enumerate() {
            let row = row?;
            let row_no = row_idx + 2;
            let id_text = row.get(id_col).unwrap_or_default();
            let question_id: u32 = id_text.parse().map_err(|_| RecordError::InvalidValue {
                row: row_no,
                message: format!("question id {:?} is not a positive integer", id_text),
            })?;

            for (col, name) in &group_cols {
                let cell = row.get(*col).unwrap_or_default();
                if cell.is_empty() {
                    continue;
                }
                let value: f64 = cell.parse().map_err(|_| RecordError::InvalidValue {
                    row: row_no,
                    message: format!("{} value {:?} is not a number", name, cell),
                })?;
                if let Some(scores) = groups.get_mut(name) {
                    scores.insert(question_id, vec![value]);
                }
            }
        }

        Ok(Self { groups })
    }

    /// A reference table and a survey export combined, either one optional
    pub fn load(
        reference: Option<&Path>,
        survey: Option<&Path>,
        layout: &SurveyLayout,
    ) -> Result<Self, RecordError> {
        let mut baseline = match reference {
            Some(path) => Self::from_csv_path(path)?,
            None => Self::new(),
        };
        if let Some(path) = survey {
            baseline.merge(Self::from_survey_path(path, layout)?);
        }
        Ok(baseline)
    }

    pub fn from_survey_path(path: impl AsRef<Path>, layout: &SurveyLayout) -> Result<Self, RecordError> {
        let file = std::fs::File::open(path.as_ref())?;
        let baseline = Self::from_survey_reader(file, layout)?;
        tracing::info!(
            "Loaded {} answers for '{}' from {}",
            baseline.answer_count(&layout.group),
            layout.group,
            path.as_ref().display()
        );
        Ok(baseline)
    }

    /// Parse a survey export into one respondent group. Empty cells are
    /// unanswered and skipped; any other non-numeric cell is an error.
    pub fn from_survey_reader<R: Read>(reader: R, layout: &SurveyLayout) -> Result<Self, RecordError> {
        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let headers = csv.headers()?.clone();

        let columns: Vec<(usize, &str)> = if layout.columns.is_empty() {
            headers.iter().enumerate().collect()
        } else {
            layout
                .columns
                .iter()
                .map(|name| {
                    headers
                        .iter()
                        .position(|h| h == name)
                        .map(|idx| (idx, name.as_str()))
                        .ok_or_else(|| RecordError::MissingColumn(name.clone()))
                })
                .collect::<Result<_, _>>()?
        };

        let mut responses: BTreeMap<u32, Vec<f64>> =
            (1..=columns.len() as u32).map(|id| (id, Vec::new())).collect();

        for (row_idx, row) in csv.records().enumerate().skip(layout.skip_rows) {
            let row = row?;
            let row_no = row_idx + 2;
            for (question_id, (col, name)) in (1u32..).zip(&columns) {
                let cell = row.get(*col).unwrap_or_default();
                if cell.is_empty() {
                    continue;
                }
                let value: f64 = cell.parse().map_err(|_| RecordError::InvalidValue {
                    row: row_no,
                    message: format!("{} answer {:?} is not a number", name, cell),
                })?;
                if let Some(answers) = responses.get_mut(&question_id) {
                    answers.push(value);
                }
            }
        }

        let mut baseline = Self::new();
        baseline.insert_respondents(layout.group.clone(), responses);
        Ok(baseline)
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The group's mean for a question; `None` when nobody answered it
    pub fn value(&self, group: &str, question_id: u32) -> Option<f64> {
        let answers = self.groups.get(group)?.get(&question_id)?;
        (!answers.is_empty()).then(|| mean(answers))
    }

    /// Every score the group has for the listed questions, in id order
    pub fn scores_for(&self, group: &str, question_ids: impl IntoIterator<Item = u32>) -> Vec<f64> {
        let Some(scores) = self.groups.get(group) else {
            return Vec::new();
        };
        let mut ids: Vec<u32> = question_ids.into_iter().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| scores.get(&id))
            .flatten()
            .copied()
            .collect()
    }

    fn answer_count(&self, group: &str) -> usize {
        self.groups
            .get(group)
            .map(|scores| scores.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Inner join of summary rows with the reference columns on question id
    pub fn join(&self, stats: &[SummaryStat]) -> Vec<JoinedSummaryRow> {
        stats
            .iter()
            .filter_map(|stat| {
                let references: IndexMap<String, f64> = self
                    .groups
                    .keys()
                    .filter_map(|name| self.value(name, stat.question_id).map(|v| (name.clone(), v)))
                    .collect();
                if references.is_empty() && !self.groups.is_empty() {
                    return None;
                }
                Some(JoinedSummaryRow {
                    question_id: stat.question_id,
                    mean: stat.mean,
                    std: stat.std,
                    references,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = "#,students,non-students\n1,4.2,3.9\n2,1.5,\n3,2.0,2.5\n";

    #[test]
    fn test_parse_reference_csv() {
        let baseline = HumanBaseline::from_csv_reader(REFERENCE.as_bytes()).unwrap();

        assert_eq!(baseline.group_names(), vec!["students", "non-students"]);
        assert_eq!(baseline.value("students", 1), Some(4.2));
        assert_eq!(baseline.value("non-students", 2), None);
        assert_eq!(baseline.scores_for("non-students", [3, 1, 2]), vec![3.9, 2.5]);
        assert!(baseline.scores_for("parents", [1]).is_empty());
    }

    #[test]
    fn test_missing_id_column() {
        let err = HumanBaseline::from_csv_reader("q,students\n1,2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, RecordError::MissingColumn(ref c) if c == "#"));
    }

    #[test]
    fn test_bad_cell_reports_row() {
        let err = HumanBaseline::from_csv_reader("#,students\n1,2\n2,lots\n".as_bytes()).unwrap_err();
        assert!(matches!(err, RecordError::InvalidValue { row: 3, .. }));
    }

    const SURVEY: &str = "\
ResponseId,Q2_refunds,Q1_soda,Finished
,Returning an item,Drinking a soda,
R_1,4,1,True
R_2,,2,True
R_3,5,1,False
";

    fn survey_layout() -> SurveyLayout {
        SurveyLayout {
            group: "respondents".into(),
            columns: vec!["Q1_soda".into(), "Q2_refunds".into()],
            skip_rows: 1,
        }
    }

    #[test]
    fn test_survey_export_keeps_every_answer() {
        let baseline = HumanBaseline::from_survey_reader(SURVEY.as_bytes(), &survey_layout()).unwrap();

        assert_eq!(baseline.group_names(), vec!["respondents"]);
        // column order decides the question id, not file order
        assert_eq!(baseline.scores_for("respondents", [1]), vec![1.0, 2.0, 1.0]);
        // the blank cell is skipped
        assert_eq!(baseline.scores_for("respondents", [2]), vec![4.0, 5.0]);
        assert_eq!(baseline.scores_for("respondents", [2, 1]).len(), 5);
        assert_eq!(baseline.value("respondents", 2), Some(4.5));
        assert_eq!(baseline.answer_count("respondents"), 5);
    }

    #[test]
    fn test_survey_export_errors() {
        let mut layout = survey_layout();
        layout.columns.push("Q3_missing".into());
        let err = HumanBaseline::from_survey_reader(SURVEY.as_bytes(), &layout).unwrap_err();
        assert!(matches!(err, RecordError::MissingColumn(ref c) if c == "Q3_missing"));

        // the wording row is read as answers when not skipped
        let err = HumanBaseline::from_survey_reader(SURVEY.as_bytes(), &SurveyLayout {
            skip_rows: 0,
            ..survey_layout()
        })
        .unwrap_err();
        assert!(matches!(err, RecordError::InvalidValue { row: 2, .. }));
    }

    #[test]
    fn test_survey_export_all_columns() {
        let layout = SurveyLayout::default();
        let baseline = HumanBaseline::from_survey_reader("a,b\n1,2\n3,\n".as_bytes(), &layout).unwrap();

        assert_eq!(baseline.group_names(), vec!["Human"]);
        assert_eq!(baseline.scores_for("Human", [1]), vec![1.0, 3.0]);
        assert_eq!(baseline.scores_for("Human", [2]), vec![2.0]);
    }

    #[test]
    fn test_merge_reference_and_respondents() {
        let mut baseline = HumanBaseline::from_csv_reader(REFERENCE.as_bytes()).unwrap();
        baseline.merge(HumanBaseline::from_survey_reader(SURVEY.as_bytes(), &survey_layout()).unwrap());

        assert_eq!(baseline.group_names(), vec!["students", "non-students", "respondents"]);
        let stats = vec![SummaryStat { question_id: 1, mean: 4.0, std: 0.5, count: 5 }];
        let joined = baseline.join(&stats);
        assert!((joined[0].references["respondents"] - 4.0 / 3.0).abs() < 1e-12);
        assert_eq!(joined[0].references["students"], 4.2);
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let survey = dir.path().join("survey.csv");
        std::fs::write(&survey, SURVEY).unwrap();

        let baseline = HumanBaseline::load(None, Some(&survey), &survey_layout()).unwrap();
        assert_eq!(baseline.group_names(), vec!["respondents"]);

        assert!(HumanBaseline::load(None, None, &survey_layout()).unwrap().is_empty());
        assert!(matches!(
            HumanBaseline::load(Some(&dir.path().join("missing.csv")), None, &survey_layout()),
            Err(RecordError::Io(_))
        ));
    }

    #[test]
    fn test_join_on_question_id() {
        let baseline = HumanBaseline::from_csv_reader(REFERENCE.as_bytes()).unwrap();
        let stats = vec![
            SummaryStat { question_id: 1, mean: 4.0, std: 0.5, count: 5 },
            SummaryStat { question_id: 9, mean: 2.0, std: 0.0, count: 5 },
        ];

        let joined = baseline.join(&stats);

        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].question_id, 1);
        assert_eq!(joined[0].references["students"], 4.2);
    }
}

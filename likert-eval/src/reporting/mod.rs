//! Results reporting: evaluation reports, sinks, run labels and console output

pub mod figures;

pub use figures::{category_bars, heatmap, BarRow, CategoryBars, Figure, Heatmap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::analysis::{ComparisonResult, ComparisonStatus, JoinedSummaryRow, SummaryStat};
use crate::records::RecordError;
use crate::survey::ResponseRecord;

/// Everything a report renderer needs about one evaluation run
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub model_name: String,
    pub provider_name: String,
    pub run_label: String,
    pub generated_at: DateTime<Utc>,
    pub system_prompt: String,
    pub summary: Vec<SummaryStat>,
    /// Summary joined with the reference groups; empty without a baseline
    pub reference_join: Vec<JoinedSummaryRow>,
    pub figures: Vec<Figure>,
    pub comparisons: Vec<ComparisonResult>,
}

/// Destination for finished reports
pub trait ReportSink {
    fn publish(&self, report: &EvaluationReport) -> Result<(), RecordError>;
}

/// Writes `<dir>/<run_label>_report.json`
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, report: &EvaluationReport) -> PathBuf {
        self.dir.join(format!("{}_report.json", report.run_label))
    }
}

impl ReportSink for JsonReportSink {
    fn publish(&self, report: &EvaluationReport) -> Result<(), RecordError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(report);
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)?;
        tracing::info!("Report written to {}", path.display());
        Ok(())
    }
}

/// Hands out `<prefix>_<n>` labels, numbering repeated runs of the same prefix.
/// Counters persist in a small JSON file.
pub struct RunLabeler {
    state_file: PathBuf,
}

impl RunLabeler {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }

    /// Next label for `prefix`, recording it in the state file
    pub fn next_label(&self, prefix: &str) -> Result<String, RecordError> {
        let mut state = self.load()?;
        let counter = state.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        let label = format!("{}_{}", prefix, counter);
        self.save(&state)?;
        Ok(label)
    }

    fn load(&self) -> Result<BTreeMap<String, u32>, RecordError> {
        if !self.state_file.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.state_file)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, state: &BTreeMap<String, u32>) -> Result<(), RecordError> {
        if let Some(parent) = self.state_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.state_file, serde_json::to_string_pretty(state)?)?;
        Ok(())
    }
}

/// Raw records as a text table. Repeated question text is blanked so each
/// statement shows once above its iterations.
pub fn format_raw_table(records: &[ResponseRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>4}  {:<60}  {:>9}  {:>8}", "#", "Question", "Iteration", "Response");

    let mut previous: Option<u32> = None;
    for record in records {
        let (id, text) = if previous == Some(record.question_id) {
            (String::new(), String::new())
        } else {
            (record.question_id.to_string(), truncate(&record.question, 60))
        };
        previous = Some(record.question_id);
        let _ = writeln!(
            out,
            "{:>4}  {:<60}  {:>9}  {:>8}",
            id, text, record.iteration, record.response
        );
    }
    out
}

/// Per-category ANOVA and Tukey results as text
pub fn format_comparisons(results: &[ComparisonResult]) -> String {
    let mut out = String::new();

    for result in results {
        let _ = writeln!(out, "\nCategory: {}", result.category);
        let _ = writeln!(out, "{:-<60}", "");

        for (group, mean) in &result.group_means {
            let std = result.group_stds.get(group).copied().unwrap_or(f64::NAN);
            let n = result.group_sizes.get(group).copied().unwrap_or(0);
            let _ = writeln!(out, "  {:<20} mean={:.3} std={:.3} n={}", group, mean, std, n);
        }

        match result.status {
            ComparisonStatus::InsufficientData => {
                let _ = writeln!(out, "  Insufficient data for ANOVA");
            }
            ComparisonStatus::Computed => {
                let _ = writeln!(
                    out,
                    "  ANOVA: F = {:.4}, p = {:.4}{}",
                    result.f_statistic,
                    result.p_value,
                    if result.p_value < 0.05 { " *" } else { "" }
                );
                if let Some(tukey) = &result.tukey {
                    let _ = writeln!(
                        out,
                        "  Tukey HSD (alpha={}, q_crit={:.3}, df={}):",
                        tukey.alpha, tukey.q_critical, tukey.df
                    );
                    let _ = writeln!(
                        out,
                        "    {:<16} {:<16} {:>9} {:>7} {:>8} {:>8} {:>6}",
                        "group1", "group2", "meandiff", "p-adj", "lower", "upper", "reject"
                    );
                    for c in &tukey.comparisons {
                        let _ = writeln!(
                            out,
                            "    {:<16} {:<16} {:>9.4} {:>7.4} {:>8.4} {:>8.4} {:>6}",
                            c.group1, c.group2, c.mean_diff, c.p_adj, c.lower, c.upper, c.reject
                        );
                    }
                }
            }
        }
    }
    out
}

/// Print a finished report to stdout
pub fn print_console_report(report: &EvaluationReport) {
    println!("\n=== Evaluation Report: {} ({}) ===\n", report.model_name, report.provider_name);
    println!("Run: {}", report.run_label);
    println!("Generated: {}\n", report.generated_at.to_rfc3339());

    println!("{:>4}  {:>8}  {:>8}", "#", "Average", "std");
    for stat in &report.summary {
        println!("{:>4}  {:>8.3}  {:>8.3}", stat.question_id, stat.mean, stat.std);
    }

    if !report.comparisons.is_empty() {
        print!("{}", format_comparisons(&report.comparisons));
    }

    println!("\n{:=<60}", "");
}

/// Default location for reports under an output directory
pub fn reports_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("reports")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CategoryComparator, HumanBaseline, ModelScores};
    use crate::survey::{Category, CategoryTable};

    fn record(question_id: u32, iteration: u32, response: u8) -> ResponseRecord {
        ResponseRecord {
            question_id,
            question: format!("Statement {}", question_id),
            iteration,
            raw_text: response.to_string(),
            response,
            rationale: None,
        }
    }

    #[test]
    fn test_raw_table_blanks_repeated_questions() {
        let table = format_raw_table(&[record(1, 0, 4), record(1, 1, 5), record(2, 0, 1)]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("Statement 1"));
        assert!(!lines[2].contains("Statement 1"));
        assert!(lines[2].trim_start().starts_with('1'));
        assert!(lines[3].contains("Statement 2"));
    }

    #[test]
    fn test_run_labeler_counts_per_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let labeler = RunLabeler::new(dir.path().join("state.json"));

        assert_eq!(labeler.next_label("gpt4o").unwrap(), "gpt4o_1");
        assert_eq!(labeler.next_label("gpt4o").unwrap(), "gpt4o_2");
        assert_eq!(labeler.next_label("claude").unwrap(), "claude_1");

        let reopened = RunLabeler::new(dir.path().join("state.json"));
        assert_eq!(reopened.next_label("gpt4o").unwrap(), "gpt4o_3");
    }

    #[test]
    fn test_json_sink_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record(1, 0, 4), record(1, 1, 5), record(2, 0, 1), record(2, 1, 2)];
        let table = CategoryTable::new(vec![Category::range("all", 1, 2)], 2).unwrap();
        let mut baseline = HumanBaseline::new();
        baseline.insert_group("students", [(1, 4.0), (2, 1.5)]);
        let comparisons = CategoryComparator::new().compare(
            &table,
            &baseline,
            &[ModelScores::from_records("gpt", &records)],
        );

        let report = EvaluationReport {
            model_name: "gpt-4o".into(),
            provider_name: "openai".into(),
            run_label: "gpt4o_1".into(),
            generated_at: Utc::now(),
            system_prompt: "rate".into(),
            summary: vec![],
            reference_join: vec![],
            figures: vec![heatmap(&records, "gpt")],
            comparisons,
        };

        let sink = JsonReportSink::new(dir.path());
        sink.publish(&report).unwrap();

        let written = std::fs::read_to_string(dir.path().join("gpt4o_1_report.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(json["run_label"], "gpt4o_1");
        assert_eq!(json["figures"][0]["kind"], "heatmap");
        assert_eq!(json["comparisons"][0]["category"], "all");

        assert!(format_comparisons(&report.comparisons).contains("Category: all"));
    }
}

//! Questionnaire to report, end to end with an in-process provider

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use likert_eval::analysis::{summarize, CategoryComparator, ComparisonStatus, HumanBaseline, ModelScores};
use likert_eval::config::Config;
use likert_eval::providers::{
    CompletionRequest, CompletionResponse, LLMProvider, ProviderResult, SharedProvider,
};
use likert_eval::records::{infer_dimensions, read_raw_csv, write_raw_csv, write_summary_csv};
use likert_eval::reporting::{
    category_bars, heatmap, EvaluationReport, JsonReportSink, ReportSink, RunLabeler,
};
use likert_eval::runner::Dispatcher;
use likert_eval::survey::parse_questions;

const QUESTIONNAIRE: &str = "\
# Consumer ethics

1. Drinking a can of soda in a store without paying for it.
2. Reporting a lie to collect an insurance claim.
3. Not saying anything when the waitress miscalculates the bill in your favor.
4. Downloading music from the internet instead of buying it.
- Buying products labeled as environmentally friendly.
- Returning to the store and paying for an item the cashier forgot to charge.
";

/// Rates the first four statements low and the rest high, alternating the
/// low ratings so iterations differ.
struct Rater {
    calls: AtomicU32,
}

#[async_trait]
impl LLMProvider for Rater {
    fn name(&self) -> &str {
        "rater"
    }

    fn default_model(&self) -> &str {
        "rater-1"
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let statement = request.conversation().next().map(|m| m.content.as_str()).unwrap_or("");
        let content = if statement.starts_with("Buying") || statement.starts_with("Returning") {
            "5"
        } else if n % 2 == 0 {
            "1"
        } else {
            "2"
        };

        Ok(CompletionResponse {
            content: content.to_string(),
            model: "rater-1".into(),
            input_tokens: 0,
            output_tokens: 1,
            finish_reason: "stop".into(),
            latency_ms: 0,
        })
    }
}

#[tokio::test]
async fn test_run_to_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::from_toml(
        r#"
        [evaluation]
        iterations = 4
        parallel_requests = 3
        base_delay_ms = 1
        jitter_seed = 1

        [[categories]]
        name = "questionable"
        start = 1
        end = 4

        [[categories]]
        name = "doing good"
        start = 5
        "#,
    )
    .unwrap();

    let questions = parse_questions(QUESTIONNAIRE);
    assert_eq!(questions.len(), 6);
    let total = questions.len() as u32;
    let table = config.category_table(total).unwrap();

    let provider: SharedProvider = Arc::new(Rater { calls: AtomicU32::new(0) });
    let dispatcher = Dispatcher::from_config(&config);
    let run = dispatcher
        .run(&questions, config.evaluation.iterations, provider)
        .await
        .unwrap();
    assert_eq!(run.records.len(), 24);

    // raw records survive a CSV round trip
    let labeler = RunLabeler::new(dir.path().join("state.json"));
    let label = labeler.next_label("rater").unwrap();
    assert_eq!(label, "rater_1");

    let raw_path = dir.path().join(format!("{}_raw.csv", label));
    write_raw_csv(&raw_path, &run.records).unwrap();
    let records = read_raw_csv(&raw_path).unwrap();
    assert_eq!(records, run.records);
    assert_eq!(infer_dimensions(&records), (6, 4));

    let summary = summarize(&records, total, 4).unwrap();
    assert_eq!(summary.len(), 6);
    assert_eq!(summary[4].mean, 5.0);
    assert_eq!(summary[4].std, 0.0);
    assert!(summary[0].mean >= 1.0 && summary[0].mean <= 2.0);
    write_summary_csv(dir.path().join(format!("{}_summary.csv", label)), &summary).unwrap();

    let baseline = HumanBaseline::from_csv_reader(
        "#,students,non-students\n1,1.4,1.2\n2,1.3,1.1\n3,2.2,1.9\n4,3.1,2.6\n5,4.6,4.4\n6,4.7,4.5\n".as_bytes(),
    )
    .unwrap();

    let comparisons = CategoryComparator::new().compare(
        &table,
        &baseline,
        &[ModelScores::from_records(&label, &records)],
    );
    assert_eq!(comparisons.len(), 2);
    assert_eq!(comparisons[0].category, "questionable");
    assert_eq!(comparisons[0].status, ComparisonStatus::Computed);
    assert_eq!(comparisons[0].group_sizes["rater_1"], 16);
    assert_eq!(comparisons[0].group_sizes["students"], 4);
    assert_eq!(comparisons[1].group_means["rater_1"], 5.0);

    let mut figures = vec![heatmap(&records, "rater")];
    figures.extend(category_bars(&table, &summary, &baseline, &label));

    let report = EvaluationReport {
        model_name: "rater-1".into(),
        provider_name: "rater".into(),
        run_label: label.clone(),
        generated_at: Utc::now(),
        system_prompt: dispatcher.system_prompt().to_string(),
        reference_join: baseline.join(&summary),
        summary,
        figures,
        comparisons,
    };
    let sink = JsonReportSink::new(dir.path().join("reports"));
    sink.publish(&report).unwrap();

    let json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(sink.path_for(&report)).unwrap(),
    )
    .unwrap();
    assert_eq!(json["figures"].as_array().unwrap().len(), 3);
    assert_eq!(json["reference_join"].as_array().unwrap().len(), 6);
    assert_eq!(json["summary"][0]["question_id"], 1);

    assert!(dir.path().join("rater_1_summary.csv").exists());
    assert_eq!(labeler.next_label("rater").unwrap(), "rater_2");
}

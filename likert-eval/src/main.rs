//! Likert survey evaluation CLI

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use likert_eval::{
    analysis::{summarize, CategoryComparator, HumanBaseline, ModelScores},
    config::{Config, ProviderSettings},
    providers::{ProviderKind, ProviderRegistry},
    records::{infer_dimensions, read_raw_csv, write_raw_csv, write_summary_csv},
    reporting::{
        category_bars, format_comparisons, format_raw_table, heatmap, print_console_report,
        reports_dir, EvaluationReport, JsonReportSink, ReportSink, RunLabeler,
    },
    runner::{DispatchError, Dispatcher},
    survey::{load_questions_from_file, ResponseProtocol},
};

#[derive(Parser)]
#[command(name = "likert-eval")]
#[command(about = "Run Likert-scale questionnaires against LLM providers and compare with human baselines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the questionnaire against one provider
    Run {
        /// Provider name (openai, anthropic, gemini, together, xai)
        #[arg(short, long)]
        provider: ProviderKind,

        /// Model override for the provider
        #[arg(short, long)]
        model: Option<String>,

        /// Questionnaire file
        #[arg(short, long)]
        questions: PathBuf,

        /// Run label prefix; runs are numbered `<label>_<n>` (default: provider name)
        #[arg(short, long)]
        label: Option<String>,

        /// Trials per question
        #[arg(long)]
        iterations: Option<u32>,

        /// Concurrent provider calls
        #[arg(long)]
        parallel: Option<usize>,

        /// Response protocol (digit_only, digit_with_rationale)
        #[arg(long)]
        protocol: Option<ResponseProtocol>,

        /// Output directory for record sets and reports
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Human reference CSV (`#` column plus one column per group)
        #[arg(short, long)]
        baseline: Option<PathBuf>,

        /// Survey export with one row per respondent; columns per `[respondents]`
        #[arg(short, long)]
        respondents: Option<PathBuf>,

        /// Print every raw record after the run
        #[arg(long)]
        show_raw: bool,
    },

    /// Compare saved raw record sets with a human baseline per category
    Analyze {
        /// Model record set as NAME=PATH; repeatable
        #[arg(short, long = "model", value_parser = parse_named_path, required = true)]
        models: Vec<(String, PathBuf)>,

        /// Human reference CSV
        #[arg(short, long)]
        baseline: Option<PathBuf>,

        /// Survey export with one row per respondent
        #[arg(short, long)]
        respondents: Option<PathBuf>,

        /// Write the comparison results as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the questions parsed from a questionnaire file
    ListQuestions {
        /// Questionnaire file
        #[arg(short, long)]
        questions: PathBuf,
    },

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/models.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("likert_eval=debug,info")
    } else {
        EnvFilter::new("likert_eval=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default(),
    };

    match cli.command {
        Commands::Run {
            provider,
            model,
            questions,
            label,
            iterations,
            parallel,
            protocol,
            output,
            baseline,
            respondents,
            show_raw,
        } => {
            let options = RunOptions {
                provider,
                model,
                questions,
                label,
                iterations,
                parallel,
                protocol,
                output,
                baseline,
                respondents,
                show_raw,
            };
            run_survey(config, options).await?;
        }

        Commands::Analyze {
            models,
            baseline,
            respondents,
            output,
        } => {
            analyze_records(
                &config,
                &models,
                baseline.as_deref(),
                respondents.as_deref(),
                output.as_deref(),
            )?;
        }

        Commands::ListQuestions { questions } => {
            list_questions(&config, &questions)?;
        }

        Commands::InitConfig { output } => {
            init_config(output)?;
        }
    }

    Ok(())
}

struct RunOptions {
    provider: ProviderKind,
    model: Option<String>,
    questions: PathBuf,
    label: Option<String>,
    iterations: Option<u32>,
    parallel: Option<usize>,
    protocol: Option<ResponseProtocol>,
    output: Option<PathBuf>,
    baseline: Option<PathBuf>,
    respondents: Option<PathBuf>,
    show_raw: bool,
}

async fn run_survey(mut config: Config, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let kind = options.provider;

    // CLI overrides
    if let Some(model) = options.model {
        config
            .providers
            .entry(kind.as_str().to_string())
            .or_insert_with(|| ProviderSettings::defaults_for(kind))
            .model = model;
    }
    if let Some(iterations) = options.iterations {
        config.evaluation.iterations = iterations;
    }
    if let Some(parallel) = options.parallel {
        config.evaluation.parallel_requests = parallel;
    }
    if let Some(protocol) = options.protocol {
        config.prompt.protocol = protocol;
    }
    let output_dir = options
        .output
        .unwrap_or_else(|| PathBuf::from(&config.evaluation.output_dir));

    let questions = load_questions_from_file(&options.questions)?;
    let total = questions.len() as u32;
    let iterations = config.evaluation.iterations;
    let table = config.category_table(total)?;

    let baseline = HumanBaseline::load(
        options.baseline.as_deref(),
        options.respondents.as_deref(),
        &config.respondents,
    )?;

    let registry = ProviderRegistry::with_kinds(&config, &[kind])?;
    let provider = registry.get(kind)?;
    let settings = config.provider_settings(kind);

    let mut dispatcher = Dispatcher::from_config(&config);
    if let Some(max_output_tokens) = settings.max_output_tokens {
        dispatcher = dispatcher.with_max_output_tokens(max_output_tokens);
    }

    let labeler = RunLabeler::new(output_dir.join("state.json"));
    let run_label = labeler.next_label(options.label.as_deref().unwrap_or(kind.as_str()))?;

    println!("=== Likert Evaluation: {} ===", run_label);
    println!("Provider: {} ({})", provider.name(), provider.default_model());
    println!("Questions: {}  Iterations: {}", total, iterations);
    println!();

    let run = match dispatcher.run(&questions, iterations, provider.clone()).await {
        Ok(run) => run,
        Err(e) => {
            if let DispatchError::MissingTrials { missing } = &e {
                for trial in missing {
                    eprintln!("  {} {:?}: {} (raw: {:?})", trial.key, trial.question, trial.error, trial.raw_text);
                }
            }
            return Err(e.into());
        }
    };

    if run.attempts > 1 {
        tracing::info!(
            "Needed {} attempts, total backoff {}ms",
            run.attempts,
            run.backoff_delays.iter().map(|d| d.as_millis()).sum::<u128>()
        );
    }

    if options.show_raw {
        print!("{}", format_raw_table(&run.records));
    }

    write_raw_csv(output_dir.join(format!("{}_raw.csv", run_label)), &run.records)?;
    let summary = summarize(&run.records, total, iterations)?;
    write_summary_csv(output_dir.join(format!("{}_summary.csv", run_label)), &summary)?;

    let mut figures = vec![heatmap(&run.records, format!("{} responses", run_label))];
    let (reference_join, comparisons) = if baseline.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        figures.extend(category_bars(&table, &summary, &baseline, &run_label));
        let scores = ModelScores::from_records(&run_label, &run.records);
        (
            baseline.join(&summary),
            CategoryComparator::new().compare(&table, &baseline, &[scores]),
        )
    };

    let report = EvaluationReport {
        model_name: provider.default_model().to_string(),
        provider_name: provider.name().to_string(),
        run_label,
        generated_at: Utc::now(),
        system_prompt: dispatcher.system_prompt().to_string(),
        summary,
        reference_join,
        figures,
        comparisons,
    };

    JsonReportSink::new(reports_dir(&output_dir)).publish(&report)?;
    print_console_report(&report);

    println!("Results saved to: {}", output_dir.display());
    Ok(())
}

fn analyze_records(
    config: &Config,
    models: &[(String, PathBuf)],
    baseline_path: Option<&Path>,
    respondents_path: Option<&Path>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let baseline = HumanBaseline::load(baseline_path, respondents_path, &config.respondents)?;

    let mut scores = Vec::with_capacity(models.len());
    let mut total = 0;
    for (name, path) in models {
        let records = read_raw_csv(path)?;
        let (questions, iterations) = infer_dimensions(&records);
        let summary = summarize(&records, questions, iterations)?;

        println!("{}: {} questions x {} iterations", name, questions, iterations);
        for stat in &summary {
            println!("  #{:<3} {:.3} ± {:.3}", stat.question_id, stat.mean, stat.std);
        }

        total = total.max(questions);
        scores.push(ModelScores::from_records(name, &records));
    }

    let table = config.category_table(total)?;
    let results = CategoryComparator::new().compare(&table, &baseline, &scores);
    print!("{}", format_comparisons(&results));

    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&results)?)?;
        println!("\nComparison written to: {}", path.display());
    }

    Ok(())
}

fn list_questions(config: &Config, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let questions = load_questions_from_file(path)?;
    let table = config.category_table(questions.len() as u32).ok();

    println!("Questions ({}):", questions.len());
    println!("{:-<60}", "");

    for question in &questions {
        let category = table
            .as_ref()
            .and_then(|t| t.category_of(question.id))
            .map(|c| c.name.as_str())
            .unwrap_or("-");
        println!("  {:>3} | {:<12} | {}", question.id, category, question.text);
    }

    Ok(())
}

fn init_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    config.save_toml(&output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}

fn parse_named_path(value: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{}'", value))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got '{}'", value));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

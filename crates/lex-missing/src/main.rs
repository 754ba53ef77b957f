//! CLI entry point for the missing-value remediation engine.

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use lex_missing::{
    Dataset, DistributionFamily, ImputationModel, MissingnessAnalyzer, MissingnessSummary,
    RemediationConfig, Remediation, SensitivityAnalyzer, SensitivityReport, Strategy,
    StrategyRunner,
};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;

/// CLI-compatible strategy enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStrategy {
    /// Drop incomplete rows
    Listwise,
    /// Replace missing numeric cells with the column mean
    Mean,
    /// Replace missing numeric cells with the column median
    Median,
    /// Replace missing cells with the most frequent value
    Mode,
    /// Predict missing cells from a least-squares fit
    Regression,
    /// Carry the last observation forward
    Locf,
    /// Fill with the expected value of a maximum-likelihood fit
    Ml,
    /// Fill with EM conditional expectations
    Em,
    /// Draw several completed datasets
    Multiple,
}

impl From<CliStrategy> for Strategy {
    fn from(cli: CliStrategy) -> Self {
        match cli {
            CliStrategy::Listwise => Strategy::ListwiseDeletion,
            CliStrategy::Mean => Strategy::MeanSubstitution,
            CliStrategy::Median => Strategy::MedianSubstitution,
            CliStrategy::Mode => Strategy::ModeSubstitution,
            CliStrategy::Regression => Strategy::RegressionImputation,
            CliStrategy::Locf => Strategy::Locf,
            CliStrategy::Ml => Strategy::MaximumLikelihood,
            CliStrategy::Em => Strategy::ExpectationMaximization,
            CliStrategy::Multiple => Strategy::MultipleImputation,
        }
    }
}

/// CLI-compatible distribution family enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliDistribution {
    Normal,
    Exponential,
    Poisson,
    Gamma,
    /// Joint multivariate normal over all selected columns
    Mvn,
}

impl From<CliDistribution> for DistributionFamily {
    fn from(cli: CliDistribution) -> Self {
        match cli {
            CliDistribution::Normal => DistributionFamily::Normal,
            CliDistribution::Exponential => DistributionFamily::Exponential,
            CliDistribution::Poisson => DistributionFamily::Poisson,
            CliDistribution::Gamma => DistributionFamily::Gamma,
            CliDistribution::Mvn => DistributionFamily::MultivariateNormal,
        }
    }
}

/// CLI-compatible multiple-imputation model enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliImputationModel {
    Regression,
    Em,
}

impl From<CliImputationModel> for ImputationModel {
    fn from(cli: CliImputationModel) -> Self {
        match cli {
            CliImputationModel::Regression => ImputationModel::Regression,
            CliImputationModel::Em => ImputationModel::Em,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Missing-value detection and remediation",
    long_about = "Profiles missing cells in a CSV file and repairs them with the chosen strategy.\n\n\
                  EXAMPLES:\n  \
                  # Summarize missingness and mean-substitute every numeric column\n  \
                  lex-missing -i airquality.csv\n\n  \
                  # Regression imputation of Ozone from Temp and Wind\n  \
                  lex-missing -i airquality.csv --strategy regression --columns Ozone --predictors Temp,Wind\n\n  \
                  # Compare strategies\n  \
                  lex-missing -i airquality.csv --sensitivity"
)]
struct Args {
    /// Path to the CSV file to remediate
    #[arg(short, long)]
    input: String,

    /// Where to write the remediated CSV (first draw for multiple imputation)
    #[arg(short, long)]
    output: Option<String>,

    /// Remediation strategy
    #[arg(short, long, value_enum, default_value = "mean")]
    strategy: CliStrategy,

    /// Columns to remediate (comma separated); defaults to every applicable column
    #[arg(short, long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Regression predictors (comma separated); defaults to every other numeric column
    #[arg(short, long, value_delimiter = ',')]
    predictors: Vec<String>,

    /// Convergence tolerance for iterative estimators
    #[arg(long, default_value = "1e-6")]
    tolerance: f64,

    /// Iteration budget for iterative estimators
    #[arg(long, default_value = "200")]
    max_iterations: usize,

    /// Number of datasets drawn by multiple imputation
    #[arg(long, default_value = "5")]
    ensemble_size: usize,

    /// Random seed for multiple imputation
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Distribution family for maximum likelihood
    #[arg(long, value_enum, default_value = "normal")]
    distribution: CliDistribution,

    /// Predictive model for multiple imputation
    #[arg(long, value_enum, default_value = "regression")]
    imputation_model: CliImputationModel,

    /// Fail on unresolved cells and on non-convergence
    #[arg(long)]
    strict: bool,

    /// Compare strategies instead of running one
    #[arg(long)]
    sensitivity: bool,

    /// Relative spread that flags a column as strategy-sensitive
    #[arg(long, default_value = "0.05")]
    threshold: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Output JSON to stdout instead of a human-readable summary
    ///
    /// Disables all logs so stdout only carries the JSON document.
    #[arg(long)]
    json: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);

    if !std::path::Path::new(&args.input).exists() {
        return Err(anyhow!("Input file not found: {}", args.input));
    }

    info!("Loading dataset from: {}", args.input);
    let dataset = Dataset::new(load_csv(&args.input)?);
    info!(
        "Dataset loaded: {} rows x {} columns",
        dataset.height(),
        dataset.width()
    );

    let config = RemediationConfig::builder()
        .strategy(args.strategy.into())
        .columns(args.columns.clone())
        .predictor_columns(args.predictors.clone())
        .tolerance(args.tolerance)
        .max_iterations(args.max_iterations)
        .ensemble_size(args.ensemble_size)
        .random_seed(args.seed)
        .sensitivity_threshold(args.threshold)
        .distribution(args.distribution.into())
        .imputation_model(args.imputation_model.into())
        .strict_unresolved(args.strict)
        .strict_convergence(args.strict)
        .build()?;

    let mask = MissingnessAnalyzer::compute_mask(&dataset);
    let summary = MissingnessAnalyzer::summarize(&mask);

    if args.sensitivity {
        let report = SensitivityAnalyzer::new(config).analyze(&dataset, &mask)?;
        if args.json {
            let document = serde_json::json!({ "summary": summary, "sensitivity": report });
            println!("{}", serde_json::to_string_pretty(&document)?);
        } else {
            print_summary(&args.input, &summary);
            print_sensitivity(&report);
        }
        return Ok(());
    }

    let remediation = StrategyRunner::run_with_mask(&dataset, &mask, &config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&json_document(&summary, &remediation)?)?);
    } else {
        print_summary(&args.input, &summary);
        print_remediation(&remediation)?;
    }

    if let Some(ref output) = args.output {
        let completed = match remediation {
            Remediation::Single(result) => result.dataset,
            Remediation::Ensemble(ensemble) => ensemble
                .datasets
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("multiple imputation produced no datasets"))?,
        };
        write_csv(output, completed)?;
        info!("Remediated dataset saved: {}", output);
    }

    Ok(())
}

fn load_csv(path: &str) -> Result<DataFrame> {
    let frame = CsvReadOptions::default()
        .with_infer_schema_length(Some(100))
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_quote_char(Some(b'"')))
        .try_into_reader_with_file_path(Some(PathBuf::from(path)))?
        .finish()?;
    Ok(frame)
}

fn write_csv(path: &str, dataset: Dataset) -> Result<()> {
    let mut frame = dataset.into_frame();
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .finish(&mut frame)?;
    Ok(())
}

fn json_document(
    summary: &MissingnessSummary,
    remediation: &Remediation,
) -> Result<serde_json::Value> {
    let mut document = serde_json::json!({
        "summary": summary,
        "provenance": remediation.provenance(),
        "unresolved": remediation.unresolved(),
    });

    match remediation {
        Remediation::Single(result) => {
            document["converged"] = serde_json::json!(result.converged);
        }
        Remediation::Ensemble(ensemble) => {
            document["ensemble_size"] = serde_json::json!(ensemble.len());
            document["pooled"] = serde_json::to_value(ensemble.pool()?)?;
        }
    }
    Ok(document)
}

// User-facing output goes through println! so it shows regardless of log level.

fn print_summary(input: &str, summary: &MissingnessSummary) {
    println!("\n{}", "=".repeat(80));
    println!("MISSINGNESS SUMMARY");
    println!("{}\n", "=".repeat(80));
    println!("  File: {}", input);
    println!("  Rows: {}", summary.shape.0);
    println!("  Columns: {}", summary.shape.1);
    println!("  Missing cells: {}", summary.total_missing);
    println!("  Complete rows: {}", summary.complete_rows);
    println!();

    println!("{:<24} {:<10} {:<10}", "Column", "Missing", "Missing %");
    println!("{}", "-".repeat(46));
    for col in &summary.columns {
        println!(
            "{:<24} {:<10} {:<10.1}{}",
            truncate_str(&col.name, 23),
            col.missing_count,
            col.missing_percentage,
            if col.fully_missing { "  (fully missing)" } else { "" }
        );
    }
    println!();
}

fn print_remediation(remediation: &Remediation) -> Result<()> {
    let provenance = remediation.provenance();

    println!("REMEDIATION: {}", provenance.strategy);
    println!("{}", "-".repeat(40));
    println!("  Rows removed: {}", provenance.rows_removed);
    println!("  Cells imputed: {}", provenance.cells_imputed);
    for column in &provenance.columns {
        match column.substituted_value {
            Some(value) => println!(
                "  - {}: {} cell(s) <- {:.4}",
                column.column, column.cells_replaced, value
            ),
            None => println!("  - {}: {} cell(s)", column.column, column.cells_replaced),
        }
    }
    for step in &provenance.steps {
        println!("  {}", step);
    }

    let unresolved = remediation.unresolved();
    if !unresolved.is_empty() {
        println!("  Unresolved cells: {}", unresolved.len());
        for issue in unresolved.iter().take(10) {
            println!("    row {} '{}': {:?}", issue.row, issue.column, issue.kind);
        }
    }

    match remediation {
        Remediation::Single(result) => {
            if let Some(converged) = result.converged {
                println!("  Converged: {}", converged);
            }
        }
        Remediation::Ensemble(ensemble) => {
            println!();
            println!("POOLED ESTIMATES ({} datasets)", ensemble.len());
            println!("{}", "-".repeat(40));
            println!(
                "{:<20} {:>12} {:>12} {:>10}",
                "Column", "Mean", "Std. error", "FMI"
            );
            for pooled in ensemble.pool()? {
                println!(
                    "{:<20} {:>12.4} {:>12.4} {:>10.3}",
                    truncate_str(&pooled.column, 19),
                    pooled.estimate,
                    pooled.standard_error,
                    pooled.fraction_missing_information
                );
            }
        }
    }
    println!();
    Ok(())
}

fn print_sensitivity(report: &SensitivityReport) {
    println!(
        "SENSITIVITY ({:?}, threshold {:.1}%)",
        report.statistic,
        report.threshold * 100.0
    );
    println!("{}", "-".repeat(40));

    for outcome in report.failed() {
        println!(
            "  {} failed: {}",
            outcome.strategy,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    for column in &report.columns {
        println!(
            "  {}: spread {:.4} ({:.1}%){}",
            column.column,
            column.spread,
            column.relative_spread * 100.0,
            if column.high_sensitivity { "  HIGH SENSITIVITY" } else { "" }
        );
        for estimate in &column.estimates {
            println!("    {:<26} {:.4}", estimate.strategy, estimate.value);
        }
    }
    println!();
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

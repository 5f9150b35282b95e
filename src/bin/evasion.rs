//! Evasion CLI - Command-line interface for the evasion risk engine
//!
//! Commands:
//! - predict: Score every student in an exported spreadsheet grid
//! - inspect: Report how the grid was normalized, without scoring
//! - config: Print the default engine configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use chrono::Utc;
use evasion_risk::export::{DashboardEncoder, ExportMetadata};
use evasion_risk::normalizer::Normalizer;
use evasion_risk::schema::RawRow;
use evasion_risk::types::{BatchOutcome, UrgencyTier};
use evasion_risk::{EngineConfig, EngineError, LogisticModel, RiskEngine, ENGINE_VERSION};

/// Evasion - Student dropout-risk scoring for academic-records exports
#[derive(Parser)]
#[command(name = "evasion")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Score student dropout risk from an academic-records grid", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every student in a grid
    Predict {
        /// Input grid as a JSON array of rows (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Logistic model file
        #[arg(short, long)]
        model: PathBuf,

        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output file path (use - for stdout). Defaults to a timestamped CSV name
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "csv")]
        format: OutputFormat,

        /// Source spreadsheet name recorded in export metadata
        #[arg(long)]
        source_name: Option<String>,

        /// Worker threads (overrides configuration)
        #[arg(long)]
        workers: Option<usize>,

        /// Batch deadline in milliseconds (overrides configuration)
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Score with model weights only, skipping institutional rules
        #[arg(long)]
        no_rules: bool,
    },

    /// Report header detection and normalization for a grid
    Inspect {
        /// Input grid as a JSON array of rows (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration as JSON
    Config,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values with run metadata columns
    Csv,
    /// JSON document with metadata, statistics and failures
    Json,
    /// Newline-delimited JSON (one prediction per line)
    Ndjson,
}

impl OutputFormat {
    fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Ndjson => "ndjson",
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), EvasionCliError> {
    match cli.command {
        Commands::Predict {
            input,
            model,
            config,
            output,
            format,
            source_name,
            workers,
            deadline_ms,
            no_rules,
        } => {
            let mut engine_config = load_config(config.as_deref())?;
            if workers.is_some() {
                engine_config.workers = workers;
            }
            if deadline_ms.is_some() {
                engine_config.deadline_ms = deadline_ms;
            }
            if no_rules {
                engine_config.apply_rules = false;
            }
            let source_name = source_name.or_else(|| file_name(&input));
            cmd_predict(
                &input,
                &model,
                engine_config,
                output.as_deref(),
                format,
                source_name,
            )
        }

        Commands::Inspect { input, config } => {
            let engine_config = load_config(config.as_deref())?;
            cmd_inspect(&input, engine_config)
        }

        Commands::Config => {
            println!("{}", EngineConfig::default().to_json()?);
            Ok(())
        }
    }
}

fn cmd_predict(
    input: &Path,
    model: &Path,
    config: EngineConfig,
    output: Option<&Path>,
    format: OutputFormat,
    source_name: Option<String>,
) -> Result<(), EvasionCliError> {
    let rows = read_grid(input)?;
    let model = LogisticModel::from_json(&fs::read_to_string(model)?)?;
    let engine = RiskEngine::with_estimator(config, model)?;
    let outcome = engine.predict_students(&rows)?;

    let mut encoder = DashboardEncoder::new();
    if let Some(name) = source_name {
        encoder = encoder.with_source_filename(name);
    }
    let now = Utc::now();

    let output_data = match format {
        OutputFormat::Csv => {
            let metadata = encoder.metadata(outcome.predictions.len(), now);
            encoder.to_csv(&outcome.predictions, Some(&metadata))
        }
        OutputFormat::Json => serde_json::to_string_pretty(&PredictReport {
            metadata: encoder.metadata(outcome.predictions.len(), now),
            outcome: &outcome,
        })?,
        OutputFormat::Ndjson => encoder.to_ndjson(&outcome.predictions)?,
    };

    let target = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| {
            PathBuf::from(DashboardEncoder::default_file_name_with_extension(
                now,
                format.extension(),
            ))
        });
    if target.to_string_lossy() == "-" {
        print!("{output_data}");
    } else {
        fs::write(&target, output_data)?;
    }

    print_summary(&outcome, &target);
    Ok(())
}

fn cmd_inspect(input: &Path, config: EngineConfig) -> Result<(), EvasionCliError> {
    let rows = read_grid(input)?;
    let normalized = Normalizer::new(&config.header, &config.aliases).normalize_grid(&rows)?;

    println!("{}", serde_json::to_string_pretty(&normalized.report)?);
    Ok(())
}

fn read_grid(input: &Path) -> Result<Vec<RawRow>, EvasionCliError> {
    let data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let rows: Vec<RawRow> = serde_json::from_str(&data)?;
    if rows.is_empty() {
        return Err(EvasionCliError::NoRows);
    }
    Ok(rows)
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, EvasionCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

fn file_name(path: &Path) -> Option<String> {
    if path.to_string_lossy() == "-" {
        return None;
    }
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Human-readable summary on stderr, kept off stdout so piped output stays clean
fn print_summary(outcome: &BatchOutcome, target: &Path) {
    let stats = &outcome.statistics;
    if atty::is(atty::Stream::Stderr) {
        eprintln!(
            "Scored {}/{} students ({} failed, {} skipped) -> {}",
            stats.scored_count,
            stats.total_records,
            stats.failed_count,
            stats.skipped_count,
            target.display()
        );
        for tier in UrgencyTier::ALL.iter().rev() {
            eprintln!("  {:<9} {}", tier.as_str(), stats.tier_counts.get(*tier));
        }
        eprintln!(
            "  mean probability {:.3}, rule overrides {}",
            stats.mean_probability, stats.override_count
        );
    } else if let Ok(json) = serde_json::to_string(stats) {
        eprintln!("{json}");
    }
}

// Error types

#[derive(Debug)]
enum EvasionCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoRows,
}

impl From<io::Error> for EvasionCliError {
    fn from(e: io::Error) -> Self {
        EvasionCliError::Io(e)
    }
}

impl From<EngineError> for EvasionCliError {
    fn from(e: EngineError) -> Self {
        EvasionCliError::Engine(e)
    }
}

impl From<serde_json::Error> for EvasionCliError {
    fn from(e: serde_json::Error) -> Self {
        EvasionCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<EvasionCliError> for CliError {
    fn from(e: EvasionCliError) -> Self {
        match e {
            EvasionCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            EvasionCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Input must be a JSON array of rows, each an array of cells".to_string()),
            },
            EvasionCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No rows found in input".to_string(),
                hint: Some("Ensure the input grid is not empty".to_string()),
            },
            EvasionCliError::Engine(e) => {
                let (code, hint) = match &e {
                    EngineError::SchemaDetection { .. } => (
                        "SCHEMA_DETECTION",
                        "Check the sentinel and header row, or add aliases to the configuration",
                    ),
                    EngineError::Scoring(_) => (
                        "SCORING_ERROR",
                        "Check that the model matches the current feature schema",
                    ),
                    EngineError::EmptyBatch => (
                        "EMPTY_BATCH",
                        "No student rows carried a registration id",
                    ),
                    EngineError::RuleConfiguration(_) => (
                        "CONFIG_ERROR",
                        "Run 'evasion config' to see valid defaults",
                    ),
                    EngineError::Json(_) => ("JSON_ERROR", "Check JSON syntax"),
                    EngineError::InvalidInput(_) => ("INVALID_INPUT", "Check the model file"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct PredictReport<'a> {
    metadata: ExportMetadata,
    #[serde(flatten)]
    outcome: &'a BatchOutcome,
}

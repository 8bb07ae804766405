use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::{json, Value};

use faultroute::error::{Classifier, ErrorContext, RawError};
use faultroute::logging::{init_logging, JsonLinesSink, LoggingConfig};
use faultroute::{ErrorPipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "faultroute")]
#[command(version)]
#[command(about = "Classify, route and log application errors")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Suppress all diagnostics except errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short, action = ArgAction::Count, global = true, conflicts_with = "quiet")]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify one raw error given as JSON and print the classification
    Classify {
        /// Read the raw error from this file instead of stdin
        #[arg(long, short)]
        file: Option<PathBuf>,

        /// Error context as a JSON object, e.g. '{"component":"Upload"}'
        #[arg(long, value_name = "JSON")]
        context: Option<String>,
    },

    /// Route a file of JSON-lines raw errors through the pipeline
    ///
    /// Each line is a raw error, or an object {"raw": ..., "context": ...}.
    /// Structured records are written to stdout as JSON lines, followed by a
    /// summary line with manager and handler statistics.
    Replay {
        /// JSON-lines input file
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = PipelineConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    init_logging(diagnostics_config(&cli, &config));

    match cli.command {
        Commands::Classify { file, context } => run_classify(&config, file.as_deref(), context),
        Commands::Replay { file } => run_replay(&config, &file).await,
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Command-line flags take precedence over the configured diagnostics level.
fn diagnostics_config(cli: &Cli, config: &PipelineConfig) -> LoggingConfig {
    config
        .diagnostics
        .clone()
        .with_cli_overrides(cli.quiet, cli.verbose)
}

fn run_classify(
    config: &PipelineConfig,
    file: Option<&Path>,
    context: Option<String>,
) -> Result<ExitCode> {
    let input = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };
    let raw: Value = serde_json::from_str(input.trim()).context("input is not valid JSON")?;
    let context = context
        .map(|c| serde_json::from_str::<ErrorContext>(&c))
        .transpose()
        .context("--context is not a valid JSON object")?;

    let classifier = Classifier::new(config.classifier.clone());
    let result = classifier.classify_with_routing(&RawError::from_json(&raw), context);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_replay(config: &PipelineConfig, file: &Path) -> Result<ExitCode> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let pipeline = ErrorPipeline::from_config_with_sink(config, Arc::new(JsonLinesSink::stdout()));
    pipeline.register_logging_handler()?;

    let mut skipped = 0_usize;
    for (index, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping invalid JSON line");
                skipped += 1;
                continue;
            }
        };
        let (raw, context) = split_envelope(value);
        pipeline.report(RawError::from_json(&raw), context).await;
    }
    pipeline.destroy();

    let summary = json!({
        "summary": {
            "stats": pipeline.manager().get_stats(),
            "handlers": pipeline.router().get_handler_stats(),
            "skipped": skipped,
        }
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(ExitCode::SUCCESS)
}

/// Unwraps `{"raw": ..., "context": ...}` lines; anything else is a bare raw error.
fn split_envelope(value: Value) -> (Value, Option<ErrorContext>) {
    match value {
        Value::Object(mut map) if map.contains_key("raw") => {
            let context = map
                .remove("context")
                .and_then(|c| serde_json::from_value::<ErrorContext>(c).ok());
            let raw = map.remove("raw").unwrap_or(Value::Null);
            (raw, context)
        }
        other => (other, None),
    }
}

//! Nika Telemetry CLI - inspect event logs and configuration

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;

use nika_telemetry::config::TransportConfig;
use nika_telemetry::event::EventStatus;
use nika_telemetry::transport::FileSink;
use nika_telemetry::{
    EvaluationResult, Evaluator, EvaluatorConfig, FixSuggestion, TelemetryConfig, TelemetryError,
    TelemetryEvent,
};

#[derive(Parser)]
#[command(name = "nika-telemetry")]
#[command(about = "Nika Telemetry - workflow execution events and scoring")]
#[command(version)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the timeline of an execution or workflow from an event log
    Query {
        /// Path to the .ndjson event log
        file: PathBuf,

        #[arg(long, conflicts_with = "workflow", required_unless_present = "workflow")]
        execution: Option<String>,

        #[arg(long)]
        workflow: Option<String>,

        /// Print raw events as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-run the evaluator over a stored execution trace
    Eval {
        /// Path to the .ndjson event log
        file: PathBuf,

        #[arg(long)]
        execution: String,

        /// Telemetry config providing evaluation thresholds
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Load and validate a telemetry config file
    ValidateConfig {
        /// Path to telemetry.yaml
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Query {
            file,
            execution,
            workflow,
            json,
        } => query(&file, execution.as_deref(), workflow.as_deref(), json).await,
        Commands::Eval {
            file,
            execution,
            config,
            json,
        } => eval(&file, &execution, config.as_deref(), json).await,
        Commands::ValidateConfig { file } => validate_config(&file),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

/// Events matching the filter, oldest first
async fn load_sorted(
    file: &Path,
    filter: impl Fn(&TelemetryEvent) -> bool,
) -> Result<Vec<TelemetryEvent>, TelemetryError> {
    let mut events: Vec<TelemetryEvent> = FileSink::load(file)
        .await?
        .into_iter()
        .filter(|e| filter(e))
        .collect();
    events.sort_by_key(|e| e.timestamp);
    Ok(events)
}

async fn query(
    file: &Path,
    execution: Option<&str>,
    workflow: Option<&str>,
    json: bool,
) -> Result<(), TelemetryError> {
    let events = load_sorted(file, |e| match (execution, workflow) {
        (Some(id), _) => e.execution_id == id,
        (None, Some(id)) => e.workflow_id == id,
        (None, None) => true,
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("{} No matching events in {}", "→".cyan(), file.display());
        return Ok(());
    }

    for event in &events {
        let kind = format!("{:<16}", event.event_type.as_str());
        let kind = match event.status {
            EventStatus::Started => kind.cyan(),
            EventStatus::Completed => kind.green(),
            EventStatus::Failed => kind.red(),
        };
        let kind = if event.event_type.is_workflow_event() {
            kind.bold()
        } else {
            kind
        };
        let duration = event
            .duration_ms
            .map(|d| format!("{}ms", d))
            .unwrap_or_default();
        println!(
            "{}  {}  {:<12} {:<20} {}",
            event.timestamp.format("%H:%M:%S%.3f"),
            kind,
            event.execution_id.dimmed(),
            event.node_name().unwrap_or("-"),
            duration
        );
    }
    println!("{} {} event(s)", "✓".green(), events.len());
    Ok(())
}

async fn eval(
    file: &Path,
    execution: &str,
    config: Option<&Path>,
    json: bool,
) -> Result<(), TelemetryError> {
    let thresholds = match config {
        Some(path) => TelemetryConfig::load(path)?.evaluation.thresholds,
        None => EvaluatorConfig::default(),
    };
    let events = load_sorted(file, |e| e.execution_id == execution).await?;
    if events.is_empty() {
        println!("{} No events for execution '{}'", "→".cyan(), execution);
        return Ok(());
    }

    let result = Evaluator::new(thresholds).evaluate(&events);
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_evaluation(execution, &result);
    }
    Ok(())
}

fn print_evaluation(execution: &str, result: &EvaluationResult) {
    let score = format!("{}/100", result.score);
    let score = match result.score {
        80..=100 => score.green().bold(),
        50..=79 => score.yellow().bold(),
        _ => score.red().bold(),
    };
    println!("{} {}  score {}", "Execution".cyan().bold(), execution, score);
    if !result.labels.is_empty() {
        println!("  Labels: {}", result.labels.join(", "));
    }
    for reason in &result.reasons {
        println!("  {}", reason);
    }

    let m = &result.metrics;
    println!("{}", "Metrics:".cyan());
    println!("  Duration: {}ms", m.total_duration_ms);
    println!("  Nodes: {} ({} failed)", m.node_count, m.failed_node_count);
    println!("  Avg node duration: {}ms", m.avg_node_duration_ms);
    if let Some(slowest) = &m.slowest_node {
        println!("  Slowest node: {} ({}ms)", slowest.name, slowest.duration_ms);
    }
    if let Some(llm) = &m.llm_metrics {
        println!("  LLM requests: {}", llm.total_requests);
        if let Some(tokens) = llm.total_tokens {
            println!("  LLM tokens: {}", tokens);
        }
    }
}

fn validate_config(file: &Path) -> Result<(), TelemetryError> {
    if !file.exists() {
        return Err(TelemetryError::ConfigError {
            reason: format!("{} not found", file.display()),
        });
    }
    let config = TelemetryConfig::load(file)?.with_env();
    config.validate()?;

    println!("{} Telemetry config '{}' is valid", "✓".green(), file.display());
    for transport in &config.transports {
        match transport {
            TransportConfig::File(f) => {
                let buffer = f.buffer_options();
                println!(
                    "  file: {} (buffer: {})",
                    f.path.display(),
                    if buffer.enabled { buffer.size.to_string() } else { "off".to_string() }
                );
            }
            TransportConfig::Http(h) => {
                println!("  http: {} (attempts: {})", h.endpoint, h.max_attempts);
                for (name, value) in h.masked_headers() {
                    println!("    {}: {}", name, value);
                }
            }
            TransportConfig::Memory(_) => println!("  memory"),
        }
    }
    println!(
        "  Redaction: {}",
        if config.redaction.enabled {
            config.redaction.fields.join(", ")
        } else {
            "off".to_string()
        }
    );
    println!(
        "  Evaluation: {}",
        if config.evaluation.enabled { "on" } else { "off" }
    );
    Ok(())
}

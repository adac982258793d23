use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use taskchain::loader::{load_file, DEFAULT_DELIMITER};
use taskchain::{init_logging, Coordinator, FaultyWork, RunConfig, RunReport, TaskState};

/// Run a task file and report what happened to each task
#[derive(Parser)]
#[command(name = "taskchain-example")]
#[command(about = "Run tasks concurrently, each gated on at most one predecessor")]
#[command(version)]
struct Cli {
    /// Task file: delimited text, or YAML when it ends in .yaml/.yml
    file: PathBuf,

    /// Field separator for delimited task files
    #[arg(short, long, default_value_t = DEFAULT_DELIMITER)]
    delimiter: char,

    /// YAML run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wall-clock length of one duration unit, in milliseconds
    #[arg(long)]
    time_unit_ms: Option<u64>,

    /// Make the named task fail after its work (repeatable)
    #[arg(long = "fail", value_name = "NAME")]
    fail: Vec<String>,

    /// Print the report as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RunConfig::from_yaml_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(ms) = cli.time_unit_ms {
        config = config.with_time_unit(Duration::from_millis(ms));
    }
    config.validate()?;
    init_logging(&config)?;

    let tasks = load_file(&cli.file, cli.delimiter)
        .with_context(|| format!("Failed to load {}", cli.file.display()))?;

    let mut coordinator = Coordinator::new(config);
    if !cli.fail.is_empty() {
        tracing::info!("Injecting faults into {:?}", cli.fail);
        coordinator = coordinator.with_workload(Arc::new(FaultyWork::new(cli.fail)));
    }

    let report = coordinator.run(&tasks).await;

    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    for outcome in &report.outcomes {
        let status = match (outcome.state, outcome.ran) {
            (TaskState::Succeeded, _) => "ok",
            (TaskState::Failed, true) => "failed",
            (TaskState::Failed, false) => "skipped",
            _ => "unknown",
        };
        print!("{:<16} {}", outcome.name, status);
        if let Some(missing) = &outcome.missing_predecessor {
            print!(" (predecessor '{}' not found)", missing);
        }
        if let Some(cause) = &outcome.failure {
            print!(": {}", cause);
        }
        println!();
    }
    println!(
        "{} succeeded, {} failed in {:.2?}",
        report.succeeded().count(),
        report.failed().count(),
        report.elapsed
    );
}

//! Runner entry point.
use anyhow::{Context, Result};
use clap::Parser;
use sim_runner::{Cli, RunnerConfig, run_trials, setup_logging};

fn main() -> Result<()> {
    // Load .env file if it exists (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Cli::parse().apply(RunnerConfig::from_env());
    let _guard = setup_logging(&config)?;

    let summary = run_trials(&config)?;
    if summary.failed > 0 {
        tracing::warn!(
            failed = summary.failed,
            completed = summary.completed,
            "some trials failed"
        );
    }
    tracing::info!(mean_dps = summary.dps.mean, "trials finished");

    let json = serde_json::to_string_pretty(&summary).context("Failed to encode summary")?;
    println!("{json}");
    Ok(())
}

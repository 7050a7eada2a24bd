//! Sluice CLI binary.
//!
//! This binary provides command-line access to Sluice's functionality:
//! - Inspect the effective configuration
//! - Turn rate limit response headers into a quota report
//! - Drive a synthetic workload through the dispatcher

use clap::Parser;
use sluice::{ObservabilityConfig, init_observability_with_config};
use std::time::Duration;

mod cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use cli::{Cli, Commands, SimulationOptions, load_config, run_simulation, show_config, show_headers};

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    init_observability_with_config(
        ObservabilityConfig::new(log_level)
            .with_json_logs(cli.json_logs)
            .with_target(false),
    )?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            show_config(&config)?;
        }

        Commands::Headers { summary } => {
            show_headers(config, summary).await?;
        }

        Commands::Simulate {
            requests,
            limit,
            window_ms,
            fail_every,
            mode,
        } => {
            let options = SimulationOptions {
                requests,
                limit,
                window: Duration::from_millis(window_ms),
                fail_every,
                mode,
            };
            run_simulation(config, options).await?;
        }
    }

    Ok(())
}

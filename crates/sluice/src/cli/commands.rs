//! CLI command definitions.

use clap::{Parser, Subcommand};
use sluice::AdmissionMode;
use std::path::PathBuf;

/// Sluice - quota-aware admission control and priority dispatch
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(about = "Quota-aware admission control and priority dispatch", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file to use instead of the layered defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration as JSON
    Config,

    /// Read `name: value` header lines from stdin and print the resulting quota
    Headers {
        /// Print usage percentages and refresh hints instead of the raw snapshot
        #[arg(long)]
        summary: bool,
    },

    /// Drive a synthetic workload through the dispatcher
    Simulate {
        /// Number of requests to enqueue, spread across all priorities
        #[arg(long, default_value = "20")]
        requests: u64,

        /// Requests the synthetic API allows per window
        #[arg(long, default_value = "5")]
        limit: u64,

        /// Length of the synthetic API's quota window in milliseconds
        #[arg(long, default_value = "1000")]
        window_ms: u64,

        /// Fail every Nth call with a transient transport error
        #[arg(long)]
        fail_every: Option<u64>,

        /// Override the configured admission mode (wait or defer)
        #[arg(long)]
        mode: Option<AdmissionMode>,
    },
}

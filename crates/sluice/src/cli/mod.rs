//! Command-line interface module.
//!
//! This module provides the CLI structure and command handlers for the sluice binary.

mod commands;
mod headers;
mod simulate;

pub use commands::{Cli, Commands};
pub use headers::show_headers;
pub use simulate::{SimulationOptions, run_simulation};

use sluice::{SluiceConfig, SluiceResult};
use std::path::Path;

/// Load configuration from `path`, or from the layered defaults.
pub fn load_config(path: Option<&Path>) -> SluiceResult<SluiceConfig> {
    match path {
        Some(path) => SluiceConfig::from_file(path),
        None => SluiceConfig::load(),
    }
}

/// Print `config` as pretty JSON.
pub fn show_config(config: &SluiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

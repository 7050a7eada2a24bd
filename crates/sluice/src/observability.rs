//! Logging bootstrap for binaries embedding Sluice.

use sluice_error::{ConfigError, ConfigErrorKind, SluiceResult};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// How log output is filtered and formatted.
///
/// `RUST_LOG`, when set, takes precedence over `log_level`. Logs are written
/// to stderr so that stdout stays free for reports.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g., "info", "sluice_queue=debug")
    pub log_level: String,
    /// Emit one JSON object per event instead of human-readable lines
    pub json_logs: bool,
    /// Include the emitting module in each event
    pub with_target: bool,
}

impl ObservabilityConfig {
    /// Create a configuration filtering at `log_level`.
    pub fn new(log_level: impl Into<String>) -> Self {
        Self {
            log_level: log_level.into(),
            json_logs: false,
            with_target: true,
        }
    }

    /// Set the filter directive.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable JSON-formatted logs.
    pub fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }

    /// Show or hide event targets.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Filter built from `RUST_LOG`, falling back to `log_level`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `log_level` is not a valid filter directive.
    pub fn env_filter(&self) -> SluiceResult<EnvFilter> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .map_err(|e| ConfigError::invalid("log_level", e.to_string()))?;
        Ok(filter)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

/// Install the global tracing subscriber with default settings.
///
/// # Errors
///
/// See [`init_observability_with_config`].
pub fn init_observability() -> SluiceResult<()> {
    init_observability_with_config(ObservabilityConfig::default())
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns `ConfigError` if the filter directive is invalid or a global
/// subscriber is already installed.
pub fn init_observability_with_config(config: ObservabilityConfig) -> SluiceResult<()> {
    let env_filter = config.env_filter()?;

    let fmt_layer = if config.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(config.with_target)
            .with_level(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(config.with_target)
            .with_level(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| {
            ConfigError::new(ConfigErrorKind::Load(format!(
                "Failed to install tracing subscriber: {}",
                e
            )))
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let config = ObservabilityConfig::default()
            .with_log_level("sluice_queue=debug")
            .with_json_logs(true)
            .with_target(false);
        assert_eq!(config.log_level, "sluice_queue=debug");
        assert!(config.json_logs);
        assert!(!config.with_target);
    }
}

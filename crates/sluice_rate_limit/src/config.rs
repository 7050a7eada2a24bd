//! Configuration for admission control and dispatching.
//!
//! Configuration is layered with the `config` crate:
//! - Bundled defaults (include_str! from sluice.toml)
//! - User overrides (~/.config/sluice/sluice.toml, then ./sluice.toml)
//!
//! Later sources override earlier ones key by key, so an override file only
//! needs the values it changes.

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use sluice_error::{ConfigError, ConfigErrorKind, SluiceResult};
use std::time::Duration;
use tracing::{debug, instrument};

/// Bundled default configuration.
const DEFAULT_CONFIG: &str = include_str!("../../../sluice.toml");

/// How the dispatcher reacts when the selected request is not yet admissible.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AdmissionMode {
    /// Block the dispatcher until the quota allows the request.
    ///
    /// Strict priority order is preserved; nothing else is dispatched while
    /// waiting.
    #[default]
    Wait,
    /// Put the request back at the head of its tier and try the next tier.
    ///
    /// Lower tiers whose head fits the remaining quota can run while a
    /// higher tier is gated.
    Defer,
}

/// Admission controller settings.
///
/// ```toml
/// [admission]
/// fallback_wait_ms = 60_000
/// max_wait_ms = 300_000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Wait used when a dimension is exhausted but its reset time is unknown
    pub fallback_wait_ms: u64,

    /// Upper bound on a blocking wait; `None` waits as long as needed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wait_ms: Option<u64>,

    /// Refresh when the request window resets within this long
    pub request_refresh_window_ms: u64,

    /// Refresh when the token window resets within this long
    pub token_refresh_window_ms: u64,

    /// Refresh when the last update is older than this
    pub stale_after_ms: u64,

    /// Client-side requests per minute ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_rpm: Option<u32>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            fallback_wait_ms: 60_000,
            max_wait_ms: None,
            request_refresh_window_ms: 30_000,
            token_refresh_window_ms: 60_000,
            stale_after_ms: 600_000,
            local_rpm: None,
        }
    }
}

impl AdmissionConfig {
    /// Wait used when a gating dimension has no known reset.
    pub fn fallback_wait(&self) -> Duration {
        Duration::from_millis(self.fallback_wait_ms)
    }

    /// Bound on a single blocking wait.
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }

    /// Request window proximity that triggers a refresh.
    pub fn request_refresh_window(&self) -> Duration {
        Duration::from_millis(self.request_refresh_window_ms)
    }

    /// Token window proximity that triggers a refresh.
    pub fn token_refresh_window(&self) -> Duration {
        Duration::from_millis(self.token_refresh_window_ms)
    }

    /// Age after which quota data counts as stale.
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Builder-style override of the wait bound.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait_ms = Some(u64::try_from(max_wait.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Builder-style override of the fallback wait.
    pub fn with_fallback_wait(mut self, fallback_wait: Duration) -> Self {
        self.fallback_wait_ms = u64::try_from(fallback_wait.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Dispatcher settings.
///
/// ```toml
/// [queue]
/// max_queue_size = 1000
/// default_max_retries = 3
/// admission_mode = "defer"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum non-terminal requests held at once
    pub max_queue_size: usize,

    /// Retry budget used when the caller does not choose one
    pub default_max_retries: u32,

    /// First retry delay before doubling
    pub base_delay_ms: u64,

    /// Ceiling on any retry delay
    pub max_delay_ms: u64,

    /// Randomize retry delays
    pub jitter: bool,

    /// Reaction to an inadmissible request
    pub admission_mode: AdmissionMode,

    /// Terminal statuses remembered for `request_status`
    pub history_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            default_max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: false,
            admission_mode: AdmissionMode::Wait,
            history_size: 256,
        }
    }
}

impl QueueConfig {
    /// First retry delay before doubling.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Ceiling on any retry delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Builder-style override of the capacity.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Builder-style override of the admission mode.
    pub fn with_admission_mode(mut self, admission_mode: AdmissionMode) -> Self {
        self.admission_mode = admission_mode;
        self
    }

    /// Builder-style override of the backoff schedule.
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
        self.max_delay_ms = u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Top-level Sluice configuration.
///
/// # Example
///
/// ```no_run
/// use sluice_rate_limit::SluiceConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SluiceConfig::load()?;
/// println!("Queue capacity: {}", config.queue.max_queue_size);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SluiceConfig {
    /// Admission controller settings
    pub admission: AdmissionConfig,

    /// Dispatcher settings
    pub queue: QueueConfig,
}

impl SluiceConfig {
    /// Load configuration from a specific file, on top of the bundled defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> SluiceResult<Self> {
        debug!("Loading configuration from file");

        let builder = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from(path.as_ref()));

        Self::build(builder)
    }

    /// Load configuration with precedence: current dir > home dir > bundled defaults.
    ///
    /// User config files are optional and skipped when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file cannot be parsed or the merged
    /// configuration is invalid.
    #[instrument]
    pub fn load() -> SluiceResult<Self> {
        debug!("Loading configuration with precedence: current dir > home dir > bundled defaults");

        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config/sluice/sluice.toml");
            builder = builder.add_source(File::from(home_config).required(false));
        }

        builder = builder.add_source(File::with_name("sluice").required(false));

        Self::build(builder)
    }

    /// Parse configuration from a TOML string on top of the bundled defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or is invalid.
    pub fn from_toml_str(toml: &str) -> SluiceResult<Self> {
        let builder = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from_str(toml, FileFormat::Toml));

        Self::build(builder)
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> SluiceResult<Self> {
        let config: SluiceConfig = builder
            .build()
            .map_err(|e| {
                ConfigError::new(ConfigErrorKind::Load(format!(
                    "Failed to build configuration: {}",
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                ConfigError::new(ConfigErrorKind::Load(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the dispatcher cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the first offending field.
    pub fn validate(&self) -> SluiceResult<()> {
        if self.queue.max_queue_size == 0 {
            Err(ConfigError::invalid(
                "queue.max_queue_size",
                "must be positive",
            ))?
        }
        if self.queue.history_size == 0 {
            Err(ConfigError::invalid("queue.history_size", "must be positive"))?
        }
        if self.queue.base_delay_ms > self.queue.max_delay_ms {
            Err(ConfigError::invalid(
                "queue.base_delay_ms",
                format!(
                    "{} exceeds max_delay_ms {}",
                    self.queue.base_delay_ms, self.queue.max_delay_ms
                ),
            ))?
        }
        if self.admission.fallback_wait_ms == 0 {
            Err(ConfigError::invalid(
                "admission.fallback_wait_ms",
                "must be positive",
            ))?
        }
        if self.admission.local_rpm == Some(0) {
            Err(ConfigError::invalid(
                "admission.local_rpm",
                "must be positive when set",
            ))?
        }
        Ok(())
    }
}

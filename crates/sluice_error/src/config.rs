//! Configuration errors.

/// Configuration failure conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ConfigErrorKind {
    /// A configuration source could not be read or parsed
    #[display("Failed to load configuration: {}", _0)]
    Load(String),
    /// A value was read but is unusable
    #[display("Invalid value for '{}': {}", field, reason)]
    Invalid {
        /// The offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Configuration error with source location.
///
/// # Examples
///
/// ```
/// use sluice_error::{ConfigError, ConfigErrorKind};
///
/// let err = ConfigError::invalid("queue.max_queue_size", "must be positive");
/// assert!(matches!(err.kind(), ConfigErrorKind::Invalid { .. }));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Configuration Error: {} at line {} in {}", kind, line, file)]
pub struct ConfigError {
    kind: ConfigErrorKind,
    line: u32,
    file: &'static str,
}

impl ConfigError {
    /// Create a new configuration error at the caller's location.
    #[track_caller]
    pub fn new(kind: ConfigErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Shorthand for a rejected field value.
    #[track_caller]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::Invalid {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Get the error kind.
    pub fn kind(&self) -> &ConfigErrorKind {
        &self.kind
    }
}

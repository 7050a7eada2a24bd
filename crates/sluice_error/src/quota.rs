//! Quota tracking and admission errors.

use std::time::Duration;

/// Conditions raised by quota bookkeeping and admission checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum QuotaErrorKind {
    /// Admission denied and the caller chose not to wait (or would exceed its deadline).
    #[display("Quota exceeded, next admission in {:?}", wait)]
    Exceeded {
        /// Time until the gating dimension resets
        wait: Duration,
    },
    /// Quota update data was malformed; prior state was kept.
    #[display("Invalid quota signal: {}", _0)]
    InvalidSignal(String),
    /// The injected refresh capability failed.
    #[display("Quota refresh failed: {}", _0)]
    Refresh(String),
}

/// Quota error with source location tracking.
///
/// # Examples
///
/// ```
/// use sluice_error::{QuotaError, QuotaErrorKind};
///
/// let err = QuotaError::new(QuotaErrorKind::InvalidSignal("empty".into()));
/// assert!(err.to_string().contains("Invalid quota signal"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Quota Error: {} at line {} in {}", kind, line, file)]
pub struct QuotaError {
    kind: QuotaErrorKind,
    line: u32,
    file: &'static str,
}

impl QuotaError {
    /// Create a new quota error at the caller's location.
    #[track_caller]
    pub fn new(kind: QuotaErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Shorthand for an invalid signal.
    #[track_caller]
    pub fn invalid_signal(reason: impl Into<String>) -> Self {
        Self::new(QuotaErrorKind::InvalidSignal(reason.into()))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &QuotaErrorKind {
        &self.kind
    }
}

//! Top-level error wrapper types.

use crate::{ConfigError, OperationError, QueueError, QuotaError, RetryableError};

/// Every error family Sluice can produce.
///
/// # Examples
///
/// ```
/// use sluice_error::{SluiceError, SluiceErrorKind, QuotaError, QuotaErrorKind};
///
/// let err: SluiceError = QuotaError::invalid_signal("no dimensions").into();
/// assert!(matches!(err.kind(), SluiceErrorKind::Quota(_)));
/// assert!(format!("{}", err).contains("Quota Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum SluiceErrorKind {
    /// Quota tracking or admission error
    #[from(QuotaError)]
    Quota(QuotaError),
    /// Dispatcher queue error
    #[from(QueueError)]
    Queue(QueueError),
    /// Dispatched operation failed
    #[from(OperationError)]
    Operation(OperationError),
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
}

/// Sluice error with kind discrimination.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Sluice Error: {}", _0)]
pub struct SluiceError(Box<SluiceErrorKind>);

impl SluiceError {
    /// Create a new error from a kind.
    pub fn new(kind: SluiceErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &SluiceErrorKind {
        &self.0
    }
}

impl RetryableError for SluiceError {
    fn is_retryable(&self) -> bool {
        match self.kind() {
            SluiceErrorKind::Operation(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl<T> From<T> for SluiceError
where
    T: Into<SluiceErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for Sluice operations.
pub type SluiceResult<T> = std::result::Result<T, SluiceError>;

//! Failures of dispatched operations and retry classification.

use std::time::Duration;

/// Ways a dispatched call can fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum OperationErrorKind {
    /// Network or connection level failure
    #[display("Transport failure: {}", _0)]
    Transport(String),
    /// HTTP error with status code and message
    #[display("HTTP {} error: {}", status_code, message)]
    Http {
        /// HTTP status code
        status_code: u16,
        /// Error message
        message: String,
    },
    /// The remote API refused the call for quota reasons
    #[display("Rate limited by remote API (retry after {:?})", retry_after)]
    RateLimited {
        /// Server supplied hint, if any
        retry_after: Option<Duration>,
    },
    /// The call did not finish in time
    #[display("Operation timed out: {}", _0)]
    Timeout(String),
    /// Permanent rejection (bad request, auth, unsupported input)
    #[display("Operation rejected: {}", _0)]
    Rejected(String),
    /// The operation panicked instead of returning
    #[display("Operation panicked: {}", _0)]
    Panicked(String),
    /// Transient failures used up the retry budget
    #[display("Operation failed after {} attempts: {}", attempts, last)]
    RetriesExhausted {
        /// Total attempts made
        attempts: u32,
        /// Last failure observed
        last: String,
    },
}

impl OperationErrorKind {
    /// Check if this failure should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            OperationErrorKind::Http { status_code, .. } => {
                matches!(*status_code, 408 | 429 | 500 | 502 | 503 | 504)
            }
            OperationErrorKind::Transport(_) => true,
            OperationErrorKind::RateLimited { .. } => true,
            OperationErrorKind::Timeout(_) => true,
            _ => false,
        }
    }

    /// Minimum delay requested by the server before trying again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OperationErrorKind::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Operation error with source location tracking.
///
/// # Examples
///
/// ```
/// use sluice_error::{OperationError, OperationErrorKind, RetryableError};
///
/// let err = OperationError::new(OperationErrorKind::Http {
///     status_code: 503,
///     message: "Service unavailable".to_string(),
/// });
/// assert!(err.is_retryable());
///
/// let err = OperationError::new(OperationErrorKind::Rejected("bad audio".into()));
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Operation Error: {} at line {} in {}", kind, line, file)]
pub struct OperationError {
    kind: OperationErrorKind,
    line: u32,
    file: &'static str,
}

impl OperationError {
    /// Create a new operation error at the caller's location.
    #[track_caller]
    pub fn new(kind: OperationErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &OperationErrorKind {
        &self.kind
    }
}

/// Errors that know whether a retry could succeed.
///
/// Transient failures (503, 429, dropped connections) return true. Permanent
/// failures (400, 401, malformed input) return false and are surfaced to the
/// caller without consuming the retry budget.
pub trait RetryableError {
    /// Returns true if this error should trigger a retry.
    fn is_retryable(&self) -> bool;
}

impl RetryableError for OperationError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        for status_code in [408, 429, 500, 502, 503, 504] {
            let kind = OperationErrorKind::Http {
                status_code,
                message: String::new(),
            };
            assert!(kind.is_retryable(), "{status_code} should retry");
        }
        for status_code in [400, 401, 403, 404, 413, 422] {
            let kind = OperationErrorKind::Http {
                status_code,
                message: String::new(),
            };
            assert!(!kind.is_retryable(), "{status_code} should not retry");
        }
    }

    #[test]
    fn test_exhausted_is_terminal() {
        let kind = OperationErrorKind::RetriesExhausted {
            attempts: 3,
            last: "boom".into(),
        };
        assert!(!kind.is_retryable());
        assert!(!OperationErrorKind::Panicked("index out of bounds".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let kind = OperationErrorKind::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(kind.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(OperationErrorKind::Timeout("slow".into()).retry_after(), None);
    }
}

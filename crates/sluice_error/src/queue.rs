//! Dispatcher queue errors.

/// Conditions raised by the priority dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum QueueErrorKind {
    /// Capacity reached at enqueue time; the request was rejected, not dropped.
    #[display("Queue is full ({} of {} slots in use)", size, max)]
    Full {
        /// Non-terminal requests currently held
        size: usize,
        /// Configured capacity
        max: usize,
    },
    /// No queued or running request has this id.
    #[display("Unknown request: {}", _0)]
    UnknownRequest(String),
    /// The request is already running and must be allowed to finish.
    #[display("Request {} is running and cannot be cancelled", _0)]
    NotCancellable(String),
    /// The request was removed before it ran.
    #[display("Request {} was cancelled", _0)]
    Cancelled(String),
    /// A background worker is already draining this dispatcher.
    #[display("Dispatcher is already processing")]
    AlreadyProcessing,
    /// The dispatcher went away before the request reached a terminal state.
    #[display("Dispatcher stopped before request completed")]
    Stopped,
}

/// Queue error with source location tracking.
///
/// # Examples
///
/// ```
/// use sluice_error::{QueueError, QueueErrorKind};
///
/// let err = QueueError::new(QueueErrorKind::Full { size: 2, max: 2 });
/// assert_eq!(err.kind(), &QueueErrorKind::Full { size: 2, max: 2 });
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Queue Error: {} at line {} in {}", kind, line, file)]
pub struct QueueError {
    kind: QueueErrorKind,
    line: u32,
    file: &'static str,
}

impl QueueError {
    /// Create a new queue error at the caller's location.
    #[track_caller]
    pub fn new(kind: QueueErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &QueueErrorKind {
        &self.kind
    }
}

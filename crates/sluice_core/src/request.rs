//! Request identity and lifecycle.

use serde::{Deserialize, Serialize};

/// Opaque identifier assigned to a request at enqueue time.
///
/// The string form is `req_<unix-seconds>_<sequence>`; the sequence is unique
/// per dispatcher, which makes the whole id unique.
///
/// ```
/// use sluice_core::RequestId;
///
/// let id = RequestId::new(1_700_000_000, 7);
/// assert_eq!(id.as_str(), "req_1700000000_7");
/// ```
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
pub struct RequestId(String);

impl RequestId {
    /// Build an id from a timestamp and a per-dispatcher sequence number.
    pub fn new(unix_seconds: i64, sequence: u64) -> Self {
        Self(format!("req_{}_{}", unix_seconds, sequence))
    }

    /// Borrow the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle of a request inside the dispatcher.
///
/// Transitions only move forward:
/// `Queued -> Running -> {Succeeded, Failed}`, `Running -> Queued` on a
/// retryable failure, and `Queued -> Cancelled`. Terminal states never change.
#[derive(
    Debug,
    Clone,
    Copy,
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
pub enum RequestStatus {
    /// Waiting in a tier
    Queued,
    /// Operation in flight
    Running,
    /// Operation returned successfully
    Succeeded,
    /// Retries exhausted or failure was permanent
    Failed,
    /// Removed before it ran
    Cancelled,
}

impl RequestStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Succeeded | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// ```
    /// use sluice_core::RequestStatus;
    ///
    /// assert!(RequestStatus::Running.can_transition_to(RequestStatus::Queued));
    /// assert!(!RequestStatus::Failed.can_transition_to(RequestStatus::Queued));
    /// assert!(!RequestStatus::Running.can_transition_to(RequestStatus::Cancelled));
    /// ```
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Queued)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

//! Quota information reported by the remote API.

use crate::Dimension;
use sluice_error::{QuotaError, SluiceResult};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// What the remote API said about one dimension.
///
/// Every field is optional; absent fields leave the tracked value untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, derive_getters::Getters)]
pub struct DimensionSignal {
    /// Window capacity
    limit: Option<u64>,
    /// Capacity left in the current window
    remaining: Option<u64>,
    /// When the window refills
    reset_at: Option<Instant>,
}

impl DimensionSignal {
    /// Signal carrying all three fields.
    pub fn new(limit: u64, remaining: u64, reset_at: Instant) -> Self {
        Self {
            limit: Some(limit),
            remaining: Some(remaining),
            reset_at: Some(reset_at),
        }
    }

    /// Set the window capacity.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the remaining capacity.
    pub fn with_remaining(mut self, remaining: u64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    /// Set the reset instant.
    pub fn with_reset_at(mut self, reset_at: Instant) -> Self {
        self.reset_at = Some(reset_at);
        self
    }

    /// Set the reset relative to now.
    pub fn with_reset_in(self, reset_in: Duration) -> Self {
        self.with_reset_at(Instant::now() + reset_in)
    }

    /// Whether no field is present.
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset_at.is_none()
    }
}

/// Mapping of dimension to what the remote API reported for it.
///
/// Dimensions missing from the mapping are left untouched when the signal is
/// applied, so partial updates are legal.
///
/// # Examples
///
/// ```
/// use sluice_core::{Dimension, DimensionSignal, QuotaSignal};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let signal = QuotaSignal::new().with(
///     Dimension::Requests,
///     DimensionSignal::default()
///         .with_limit(30)
///         .with_remaining(29)
///         .with_reset_in(Duration::from_secs(2)),
/// );
/// assert!(signal.validate().is_ok());
/// assert!(signal.get(Dimension::Tokens).is_none());
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaSignal {
    dimensions: BTreeMap<Dimension, DimensionSignal>,
}

impl QuotaSignal {
    /// Empty signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the entry for one dimension.
    pub fn with(mut self, dimension: Dimension, signal: DimensionSignal) -> Self {
        self.insert(dimension, signal);
        self
    }

    /// Add or replace the entry for one dimension in place.
    pub fn insert(&mut self, dimension: Dimension, signal: DimensionSignal) {
        self.dimensions.insert(dimension, signal);
    }

    /// Entry for one dimension, if reported.
    pub fn get(&self, dimension: Dimension) -> Option<&DimensionSignal> {
        self.dimensions.get(&dimension)
    }

    /// Reported dimensions in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &DimensionSignal)> {
        self.dimensions.iter().map(|(dimension, signal)| (*dimension, signal))
    }

    /// Whether no dimension is reported.
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Reject signals that carry no information.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignal` when the signal has no dimensions, or when a
    /// reported dimension has no fields.
    pub fn validate(&self) -> SluiceResult<()> {
        if self.is_empty() {
            Err(QuotaError::invalid_signal("signal reports no dimensions"))?
        }
        if let Some((dimension, _)) = self.iter().find(|(_, signal)| signal.is_empty()) {
            Err(QuotaError::invalid_signal(format!(
                "dimension {} reported without limit, remaining, or reset",
                dimension
            )))?
        }
        Ok(())
    }
}

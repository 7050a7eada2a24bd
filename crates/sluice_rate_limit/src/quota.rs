//! Shared quota state and its update protocol.
//!
//! `QuotaState` is the single source of truth for what the remote API has
//! told us about our limits. Readers take consistent snapshots; writers apply
//! signals under an exclusive lock that is held only for the mutation itself.

use crate::QuotaRefresher;
use serde::Serialize;
use sluice_core::{Dimension, QuotaSignal, ResourceCost};
use sluice_error::SluiceResult;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Tracked value of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_getters::Getters)]
pub struct DimensionQuota {
    /// Window capacity
    limit: u64,
    /// Capacity left in the current window
    remaining: u64,
    /// When the window refills, if known
    reset_at: Option<Instant>,
}

impl DimensionQuota {
    /// Whether the window has rolled over at `now`.
    pub fn has_reset(&self, now: Instant) -> bool {
        self.reset_at.is_some_and(|reset_at| now >= reset_at)
    }

    /// Remaining capacity at `now`, counting an elapsed reset as a full refill.
    pub fn effective_remaining(&self, now: Instant) -> u64 {
        if self.has_reset(now) {
            self.limit
        } else {
            self.remaining
        }
    }

    /// Whether `amount` fits at `now`.
    pub fn admits(&self, amount: u64, now: Instant) -> bool {
        self.has_reset(now) || self.remaining >= amount
    }

    /// Time until the window refills, zero if already past.
    pub fn reset_in(&self, now: Instant) -> Option<Duration> {
        self.reset_at
            .map(|reset_at| reset_at.saturating_duration_since(now))
    }
}

#[derive(Debug, Clone, Default)]
struct QuotaFields {
    dimensions: [Option<DimensionQuota>; 3],
    last_update: Option<Instant>,
    has_info: bool,
}

impl QuotaFields {
    fn snapshot(&self, now: Instant) -> QuotaSnapshot {
        QuotaSnapshot {
            dimensions: self.dimensions,
            last_update: self.last_update,
            has_info: self.has_info,
            taken_at: now,
        }
    }
}

/// A limit that moved as the result of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_getters::Getters)]
pub struct LimitChange {
    /// Dimension whose limit changed
    dimension: Dimension,
    /// Previous limit, `None` when the dimension was untracked
    old: Option<u64>,
    /// New limit
    new: u64,
}

/// What an applied signal changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, derive_getters::Getters)]
pub struct QuotaUpdate {
    /// Dimensions whose tracked values were written
    applied: Vec<Dimension>,
    /// Limits that differ from before
    limit_changes: Vec<LimitChange>,
}

/// Current quota for every dimension, guarded by an async read-write lock.
///
/// # Examples
///
/// ```
/// use sluice_core::{Dimension, DimensionSignal, QuotaSignal};
/// use sluice_rate_limit::QuotaState;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let state = QuotaState::new();
/// let signal = QuotaSignal::new().with(
///     Dimension::Requests,
///     DimensionSignal::default().with_limit(10).with_remaining(15),
/// );
/// state.update_from_signal(&signal).await?;
///
/// let snapshot = state.snapshot().await;
/// let requests = snapshot.get(Dimension::Requests).unwrap();
/// assert_eq!(*requests.remaining(), 10);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct QuotaState {
    inner: RwLock<QuotaFields>,
}

impl QuotaState {
    /// Create a state with no quota information.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a signal reported by the remote API.
    ///
    /// Partial signals are legal: unreported dimensions and absent fields keep
    /// their current values. `remaining` is clamped to `limit`. A dimension
    /// seen for the first time takes its limit from the reported limit, or
    /// from the reported remaining when no limit is given; a first report
    /// carrying only a reset time is ignored since there is nothing to gate
    /// on.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignal` without touching state when the signal is empty
    /// or contains an empty dimension entry.
    #[instrument(skip(self, signal), fields(dimensions = signal.iter().count()))]
    pub async fn update_from_signal(&self, signal: &QuotaSignal) -> SluiceResult<QuotaUpdate> {
        signal.validate()?;

        let mut update = QuotaUpdate::default();
        let mut fields = self.inner.write().await;
        let now = Instant::now();

        for (dimension, reported) in signal.iter() {
            let slot = &mut fields.dimensions[dimension.index()];
            let next = match slot {
                Some(current) => {
                    let limit = reported.limit().unwrap_or(current.limit);
                    // An elapsed reset is materialized before the report is
                    // applied, so absent fields never revive a stale window.
                    let (carried, carried_reset) = if current.has_reset(now) {
                        (limit, None)
                    } else {
                        (current.remaining, current.reset_at)
                    };
                    DimensionQuota {
                        limit,
                        remaining: reported.remaining().unwrap_or(carried).min(limit),
                        reset_at: reported.reset_at().or(carried_reset),
                    }
                }
                None => {
                    let Some(limit) = reported.limit().or(*reported.remaining()) else {
                        debug!(%dimension, "Ignoring reset-only report for untracked dimension");
                        continue;
                    };
                    DimensionQuota {
                        limit,
                        remaining: reported.remaining().unwrap_or(limit).min(limit),
                        reset_at: *reported.reset_at(),
                    }
                }
            };

            let old = slot.map(|current| current.limit);
            if old != Some(next.limit) {
                info!(%dimension, old = ?old, new = next.limit, "Quota limit changed");
                update.limit_changes.push(LimitChange {
                    dimension,
                    old,
                    new: next.limit,
                });
            }

            debug!(
                %dimension,
                limit = next.limit,
                remaining = next.remaining,
                "Updated dimension"
            );
            *slot = Some(next);
            update.applied.push(dimension);
        }

        fields.has_info = true;
        fields.last_update = Some(match fields.last_update {
            Some(previous) => previous.max(now),
            None => now,
        });

        Ok(update)
    }

    /// Fetch a fresh signal from `refresher` and apply it.
    ///
    /// # Errors
    ///
    /// Returns the refresher's error unchanged; state is not touched in that
    /// case.
    #[instrument(skip_all)]
    pub async fn force_refresh(&self, refresher: &dyn QuotaRefresher) -> SluiceResult<QuotaUpdate> {
        debug!("Forcing quota refresh");
        let signal = refresher.fetch_quota().await?;
        self.update_from_signal(&signal).await
    }

    /// Consistent copy of every field, taken under one read lock.
    pub async fn snapshot(&self) -> QuotaSnapshot {
        let fields = self.inner.read().await;
        fields.snapshot(Instant::now())
    }

    /// Forget everything and start from a pristine state.
    #[instrument(skip(self))]
    pub async fn reset(&self) {
        debug!("Resetting quota state");
        *self.inner.write().await = QuotaFields::default();
    }

    /// Check admission and debit the local estimate as one atomic step.
    ///
    /// Returns false, leaving state untouched, when `cost` does not fit.
    /// Elapsed resets are materialized here: the window refills to its limit
    /// and the stale reset time is cleared.
    #[instrument(skip(self), fields(tokens = cost.tokens(), requests = cost.requests()))]
    pub async fn try_debit(&self, cost: &ResourceCost) -> bool {
        let mut fields = self.inner.write().await;
        let now = Instant::now();

        if !fields.snapshot(now).admits(cost) {
            debug!("Cost does not fit current quota");
            return false;
        }

        for (dimension, amount) in cost.requested() {
            if let Some(quota) = fields.dimensions[dimension.index()].as_mut() {
                if quota.has_reset(now) {
                    debug!(%dimension, limit = quota.limit, "Window rolled over");
                    quota.remaining = quota.limit;
                    quota.reset_at = None;
                }
                quota.remaining = quota.remaining.saturating_sub(amount);
            }
        }

        true
    }
}

/// Immutable view of `QuotaState` at one instant.
#[derive(Debug, Clone, PartialEq, Eq, derive_getters::Getters)]
pub struct QuotaSnapshot {
    #[getter(skip)]
    dimensions: [Option<DimensionQuota>; 3],
    /// When the last signal was applied
    last_update: Option<Instant>,
    /// Whether any signal has ever been applied
    has_info: bool,
    /// When this snapshot was taken
    taken_at: Instant,
}

impl QuotaSnapshot {
    /// Tracked value of one dimension, `None` when untracked.
    pub fn get(&self, dimension: Dimension) -> Option<&DimensionQuota> {
        self.dimensions[dimension.index()].as_ref()
    }

    /// Tracked dimensions with their values.
    pub fn tracked(&self) -> impl Iterator<Item = (Dimension, &DimensionQuota)> {
        Dimension::ALL
            .into_iter()
            .filter_map(|dimension| self.get(dimension).map(|quota| (dimension, quota)))
    }

    /// Time since the last applied signal.
    pub fn time_since_update(&self) -> Option<Duration> {
        self.last_update
            .map(|last_update| self.taken_at.saturating_duration_since(last_update))
    }

    /// Whether `cost` fits the quota as of this snapshot.
    ///
    /// Without any quota information everything is admitted. Untracked
    /// dimensions never block.
    pub fn admits(&self, cost: &ResourceCost) -> bool {
        if !self.has_info {
            return true;
        }
        cost.requested().all(|(dimension, amount)| {
            self.get(dimension)
                .is_none_or(|quota| quota.admits(amount, self.taken_at))
        })
    }

    /// How long until `cost` could fit, zero if it fits now.
    ///
    /// The longest reset among blocking dimensions wins. A blocking dimension
    /// without a known reset contributes `fallback_wait`.
    pub fn wait_time(&self, cost: &ResourceCost, fallback_wait: Duration) -> Duration {
        if !self.has_info {
            return Duration::ZERO;
        }
        cost.requested()
            .filter_map(|(dimension, amount)| {
                let quota = self.get(dimension)?;
                if quota.admits(amount, self.taken_at) {
                    None
                } else {
                    Some(quota.reset_in(self.taken_at).unwrap_or(fallback_wait))
                }
            })
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Serializable form with times expressed relative to the snapshot.
    pub fn report(&self) -> QuotaReport {
        let dimensions = self
            .tracked()
            .map(|(dimension, quota)| {
                (
                    dimension,
                    DimensionReport {
                        limit: quota.limit,
                        remaining: quota.effective_remaining(self.taken_at),
                        reset_in_ms: quota
                            .reset_in(self.taken_at)
                            .map(|reset_in| u64::try_from(reset_in.as_millis()).unwrap_or(u64::MAX)),
                    },
                )
            })
            .collect();

        QuotaReport {
            has_info: self.has_info,
            since_update_ms: self
                .time_since_update()
                .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
            dimensions,
        }
    }
}

/// One dimension in a [`QuotaReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionReport {
    /// Window capacity
    pub limit: u64,
    /// Remaining capacity, counting an elapsed reset as a refill
    pub remaining: u64,
    /// Milliseconds until the window refills
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_in_ms: Option<u64>,
}

/// Serializable quota snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaReport {
    /// Whether any signal has ever been applied
    pub has_info: bool,
    /// Milliseconds since the last applied signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_update_ms: Option<u64>,
    /// Tracked dimensions
    pub dimensions: BTreeMap<Dimension, DimensionReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::DimensionSignal;

    fn requests(limit: u64, remaining: u64) -> QuotaSignal {
        QuotaSignal::new().with(
            Dimension::Requests,
            DimensionSignal::default()
                .with_limit(limit)
                .with_remaining(remaining),
        )
    }

    #[tokio::test]
    async fn test_limit_change_reported_once() {
        let state = QuotaState::new();
        let first = state.update_from_signal(&requests(30, 29)).await.unwrap();
        assert_eq!(first.limit_changes().len(), 1);
        assert_eq!(*first.limit_changes()[0].old(), None);

        let second = state.update_from_signal(&requests(30, 28)).await.unwrap();
        assert!(second.limit_changes().is_empty());

        let third = state.update_from_signal(&requests(60, 60)).await.unwrap();
        assert_eq!(*third.limit_changes()[0].old(), Some(30));
        assert_eq!(*third.limit_changes()[0].new(), 60);
    }

    #[tokio::test]
    async fn test_remaining_only_infers_limit() {
        let state = QuotaState::new();
        let signal = QuotaSignal::new().with(
            Dimension::Tokens,
            DimensionSignal::default().with_remaining(500),
        );
        state.update_from_signal(&signal).await.unwrap();

        let snapshot = state.snapshot().await;
        let tokens = snapshot.get(Dimension::Tokens).unwrap();
        assert_eq!(*tokens.limit(), 500);
        assert_eq!(*tokens.remaining(), 500);
    }

    #[tokio::test]
    async fn test_reset_only_report_for_new_dimension_is_ignored() {
        let state = QuotaState::new();
        let signal = QuotaSignal::new().with(
            Dimension::AudioSeconds,
            DimensionSignal::default().with_reset_in(Duration::from_secs(5)),
        );
        let update = state.update_from_signal(&signal).await.unwrap();

        assert!(update.applied().is_empty());
        assert!(state.snapshot().await.get(Dimension::AudioSeconds).is_none());
    }
}

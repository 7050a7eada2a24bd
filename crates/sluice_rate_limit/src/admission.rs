//! Admission control over shared quota state.
//!
//! The controller answers one question: may a call with this cost go out
//! now? When the answer is no it can say how long to wait, wait for you, or
//! fail fast, depending on which entry point is used.

use crate::{AdmissionConfig, LocalPacer, QuotaRefresher, QuotaSnapshot, QuotaState, QuotaUpdate};
use serde::Serialize;
use sluice_core::{Dimension, QuotaSignal, ResourceCost};
use sluice_error::{QuotaError, QuotaErrorKind, SluiceResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Shortest sleep between re-evaluations while blocked.
const MIN_POLL: Duration = Duration::from_millis(10);

/// Gatekeeper for calls against a quota-limited API.
///
/// Cloning is cheap and every clone observes the same `QuotaState`.
///
/// # Example
///
/// ```
/// use sluice_core::{Dimension, DimensionSignal, QuotaSignal, ResourceCost};
/// use sluice_rate_limit::{AdmissionConfig, AdmissionController};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let controller = AdmissionController::new(AdmissionConfig::default());
///
/// // No information yet: everything is admitted.
/// assert!(controller.can_proceed(&ResourceCost::default()).await);
///
/// let exhausted = QuotaSignal::new().with(
///     Dimension::Requests,
///     DimensionSignal::default()
///         .with_limit(30)
///         .with_remaining(0)
///         .with_reset_in(Duration::from_secs(5)),
/// );
/// controller.record_outcome(Some(&exhausted)).await?;
/// assert!(!controller.can_proceed(&ResourceCost::default()).await);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AdmissionController {
    state: Arc<QuotaState>,
    config: AdmissionConfig,
    pacer: Option<Arc<LocalPacer>>,
}

impl AdmissionController {
    /// Create a controller over a fresh `QuotaState`.
    pub fn new(config: AdmissionConfig) -> Self {
        Self::with_state(Arc::new(QuotaState::new()), config)
    }

    /// Create a controller over an existing, possibly shared, `QuotaState`.
    #[instrument(skip(state))]
    pub fn with_state(state: Arc<QuotaState>, config: AdmissionConfig) -> Self {
        let pacer = config
            .local_rpm
            .and_then(LocalPacer::per_minute)
            .map(Arc::new);
        if let Some(pacer) = &pacer {
            debug!(rpm = pacer.rpm(), "Local pacing enabled");
        }
        Self {
            state,
            config,
            pacer,
        }
    }

    /// Shared quota state.
    pub fn state(&self) -> &Arc<QuotaState> {
        &self.state
    }

    /// Controller settings.
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Consistent copy of the quota state.
    pub async fn snapshot(&self) -> QuotaSnapshot {
        self.state.snapshot().await
    }

    /// Whether `cost` fits the current quota. Never mutates state.
    pub async fn can_proceed(&self, cost: &ResourceCost) -> bool {
        self.snapshot().await.admits(cost)
    }

    /// How long until `cost` could fit; zero if it fits now.
    pub async fn wait_time(&self, cost: &ResourceCost) -> Duration {
        self.snapshot()
            .await
            .wait_time(cost, self.config.fallback_wait())
    }

    /// Fail fast when `cost` does not fit.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded` carrying the wait that would be needed.
    pub async fn check(&self, cost: &ResourceCost) -> SluiceResult<()> {
        let snapshot = self.snapshot().await;
        if snapshot.admits(cost) {
            return Ok(());
        }
        let wait = snapshot.wait_time(cost, self.config.fallback_wait());
        Err(QuotaError::new(QuotaErrorKind::Exceeded { wait }))?
    }

    /// Block until `cost` fits the quota.
    ///
    /// Sleeps without holding any lock and re-evaluates on every wake, so
    /// updates that land while sleeping are honored. When `max_wait` is
    /// configured the wait is bounded by it.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded` only when `max_wait` is configured and the
    /// required wait would exceed it.
    #[instrument(skip(self), fields(tokens = cost.tokens(), requests = cost.requests()))]
    pub async fn wait_if_needed(&self, cost: &ResourceCost) -> SluiceResult<()> {
        match self.config.max_wait() {
            Some(max_wait) => self.wait_with_deadline(cost, Instant::now() + max_wait).await,
            None => {
                loop {
                    let snapshot = self.snapshot().await;
                    if snapshot.admits(cost) {
                        return Ok(());
                    }
                    let wait = snapshot
                        .wait_time(cost, self.config.fallback_wait())
                        .max(MIN_POLL);
                    debug!(wait_ms = wait.as_millis() as u64, "Waiting for quota");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Block until `cost` fits, but never sleep past `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded { wait }` as soon as the required wait would
    /// end after `deadline`.
    #[instrument(skip(self, deadline), fields(tokens = cost.tokens(), requests = cost.requests()))]
    pub async fn wait_with_deadline(
        &self,
        cost: &ResourceCost,
        deadline: Instant,
    ) -> SluiceResult<()> {
        loop {
            let snapshot = self.snapshot().await;
            if snapshot.admits(cost) {
                return Ok(());
            }
            let wait = snapshot
                .wait_time(cost, self.config.fallback_wait())
                .max(MIN_POLL);
            if *snapshot.taken_at() + wait > deadline {
                debug!(wait_ms = wait.as_millis() as u64, "Required wait exceeds deadline");
                Err(QuotaError::new(QuotaErrorKind::Exceeded { wait }))?
            }
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for quota");
            tokio::time::sleep(wait).await;
        }
    }

    /// Wait for the local pacing slot, if pacing is configured.
    pub async fn pace(&self) {
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }
    }

    /// Wait for quota and local pacing, then debit `cost` from the local
    /// estimate.
    ///
    /// Waiting and debiting are retried together, so a concurrent caller
    /// that spent the quota first sends this one back to waiting.
    ///
    /// # Errors
    ///
    /// Propagates `QuotaExceeded` from a bounded wait.
    #[instrument(skip(self), fields(tokens = cost.tokens(), requests = cost.requests()))]
    pub async fn acquire(&self, cost: &ResourceCost) -> SluiceResult<()> {
        self.pace().await;
        loop {
            self.wait_if_needed(cost).await?;
            if self.state.try_debit(cost).await {
                debug!("Quota acquired");
                return Ok(());
            }
        }
    }

    /// Debit `cost` if it fits right now, without waiting.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded` with the wait that would be needed, from either
    /// the quota or local pacing.
    #[instrument(skip(self), fields(tokens = cost.tokens(), requests = cost.requests()))]
    pub async fn try_acquire(&self, cost: &ResourceCost) -> SluiceResult<()> {
        self.check(cost).await?;
        if let Some(pacer) = &self.pacer {
            pacer
                .check()
                .map_err(|wait| QuotaError::new(QuotaErrorKind::Exceeded { wait }))?;
        }
        if self.state.try_debit(cost).await {
            Ok(())
        } else {
            let wait = self.wait_time(cost).await;
            Err(QuotaError::new(QuotaErrorKind::Exceeded { wait }))?
        }
    }

    /// Feed the quota signal observed on a call back into the state.
    ///
    /// `None` (the call carried no quota information) is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignal` if the signal is malformed.
    pub async fn record_outcome(
        &self,
        signal: Option<&QuotaSignal>,
    ) -> SluiceResult<Option<QuotaUpdate>> {
        match signal {
            Some(signal) => self.state.update_from_signal(signal).await.map(Some),
            None => Ok(None),
        }
    }

    /// Whether the quota data should be refreshed.
    ///
    /// True when nothing is known yet, when the request or token window is
    /// about to roll over, or when the data has gone stale.
    pub async fn needs_refresh(&self) -> bool {
        Self::snapshot_needs_refresh(&self.snapshot().await, &self.config)
    }

    fn snapshot_needs_refresh(snapshot: &QuotaSnapshot, config: &AdmissionConfig) -> bool {
        if !snapshot.has_info() {
            return true;
        }
        let now = *snapshot.taken_at();
        let resets_within = |dimension: Dimension, window: Duration| {
            snapshot
                .get(dimension)
                .and_then(|quota| quota.reset_in(now))
                .is_some_and(|reset_in| reset_in <= window)
        };
        resets_within(Dimension::Requests, config.request_refresh_window())
            || resets_within(Dimension::Tokens, config.token_refresh_window())
            || snapshot
                .time_since_update()
                .is_some_and(|elapsed| elapsed > config.stale_after())
    }

    /// Refresh from `refresher` only when [`needs_refresh`](Self::needs_refresh).
    ///
    /// # Errors
    ///
    /// Returns the refresher's error; state is left unchanged.
    #[instrument(skip_all)]
    pub async fn refresh_if_needed(
        &self,
        refresher: &dyn QuotaRefresher,
    ) -> SluiceResult<Option<QuotaUpdate>> {
        if !self.needs_refresh().await {
            return Ok(None);
        }
        self.force_refresh(refresher).await.map(Some)
    }

    /// Refresh from `refresher` unconditionally.
    ///
    /// # Errors
    ///
    /// Returns the refresher's error; state is left unchanged.
    pub async fn force_refresh(&self, refresher: &dyn QuotaRefresher) -> SluiceResult<QuotaUpdate> {
        self.state.force_refresh(refresher).await
    }

    /// Human-oriented overview of the current quota.
    pub async fn summary(&self) -> QuotaSummary {
        let snapshot = self.snapshot().await;
        let now = *snapshot.taken_at();
        let dimensions = snapshot
            .tracked()
            .map(|(dimension, quota)| {
                let remaining = quota.effective_remaining(now);
                let used_percent = if *quota.limit() == 0 {
                    0.0
                } else {
                    (quota.limit() - remaining) as f64 / *quota.limit() as f64 * 100.0
                };
                (
                    dimension,
                    DimensionUsage {
                        limit: *quota.limit(),
                        remaining,
                        used_percent,
                        reset_in_ms: quota
                            .reset_in(now)
                            .map(|reset_in| u64::try_from(reset_in.as_millis()).unwrap_or(u64::MAX)),
                    },
                )
            })
            .collect();

        QuotaSummary {
            has_info: *snapshot.has_info(),
            needs_refresh: Self::snapshot_needs_refresh(&snapshot, &self.config),
            since_update_ms: snapshot
                .time_since_update()
                .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
            dimensions,
        }
    }

    /// Spawn a task that calls [`refresh_if_needed`](Self::refresh_if_needed)
    /// every `interval`.
    ///
    /// Refresh failures are logged and the task keeps going. Abort the
    /// returned handle to stop it.
    pub fn spawn_periodic_refresh(
        &self,
        refresher: Arc<dyn QuotaRefresher>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match controller.refresh_if_needed(refresher.as_ref()).await {
                    Ok(Some(update)) => {
                        debug!(dimensions = update.applied().len(), "Periodic refresh applied")
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Periodic quota refresh failed"),
                }
            }
        })
    }
}

/// Usage of one tracked dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionUsage {
    /// Window capacity
    pub limit: u64,
    /// Capacity left, counting an elapsed reset as a refill
    pub remaining: u64,
    /// Share of the window already spent
    pub used_percent: f64,
    /// Milliseconds until the window refills
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_in_ms: Option<u64>,
}

/// Overview returned by [`AdmissionController::summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaSummary {
    /// Whether any signal has ever been applied
    pub has_info: bool,
    /// Whether a refresh is due
    pub needs_refresh: bool,
    /// Milliseconds since the last applied signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_update_ms: Option<u64>,
    /// Usage per tracked dimension
    pub dimensions: BTreeMap<Dimension, DimensionUsage>,
}

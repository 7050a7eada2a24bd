//! Four-tier priority dispatcher.
//!
//! Producers enqueue from anywhere; a single consumer drains the tiers in
//! strict priority order, consulting the admission controller before every
//! attempt and feeding each response's quota signal back into it.

use crate::{
    Attempt, BackoffPolicy, Operation, QueueStats, QueueStatus, RequestEnvelope, RequestTicket,
    TierSizes,
};
use sluice_core::{Priority, RequestId, RequestStatus, ResourceCost};
use sluice_error::{
    OperationError, OperationErrorKind, QueueError, QueueErrorKind, QuotaErrorKind,
    RetryableError, SluiceError, SluiceErrorKind, SluiceResult,
};
use sluice_rate_limit::{AdmissionController, AdmissionMode, QueueConfig};
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard, oneshot};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// What a single call to [`PriorityDispatcher::dispatch_once`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing is queued.
    Idle,
    /// Everything queued is waiting out a retry backoff.
    Backoff {
        /// Earliest instant a request becomes eligible
        until: Instant,
    },
    /// Eligible requests exist but none fits the quota right now.
    Deferred {
        /// Shortest wait after which one could fit
        wait: Duration,
    },
    /// A request reached a terminal state.
    Completed {
        /// The request
        id: RequestId,
        /// `Succeeded` or `Failed`
        status: RequestStatus,
    },
    /// A request failed and was put back for another attempt.
    Retrying {
        /// The request
        id: RequestId,
        /// When it becomes eligible again
        retry_at: Instant,
    },
}

/// Wait carried by a `QuotaExceeded` error.
fn exceeded_wait(error: &SluiceError) -> Option<Duration> {
    match error.kind() {
        SluiceErrorKind::Quota(quota_err) => match quota_err.kind() {
            QuotaErrorKind::Exceeded { wait } => Some(*wait),
            _ => None,
        },
        _ => None,
    }
}

/// Text of a panic payload, when it carries one.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Result of the cancel-safe selection phase.
pub(crate) enum Selection<T> {
    Ready(RequestEnvelope<T>),
    Empty(DispatchOutcome),
}

struct Tiers<T> {
    queues: [VecDeque<RequestEnvelope<T>>; 4],
    running: Option<RequestId>,
    stats: QueueStats,
    history: VecDeque<(RequestId, RequestStatus)>,
    sequence: u64,
}

impl<T> Tiers<T> {
    fn new() -> Self {
        Self {
            queues: Default::default(),
            running: None,
            stats: QueueStats::default(),
            history: VecDeque::new(),
            sequence: 0,
        }
    }

    fn queued(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    fn in_flight(&self) -> usize {
        self.queued() + usize::from(self.running.is_some())
    }

    fn sizes(&self) -> TierSizes {
        let mut sizes = TierSizes::default();
        for priority in Priority::DISPATCH_ORDER {
            sizes.set(priority, self.queues[priority.rank()].len());
        }
        sizes
    }

    /// Position of the first eligible envelope in one tier.
    fn first_eligible(&self, rank: usize, now: Instant) -> Option<usize> {
        self.queues[rank]
            .iter()
            .position(|envelope| envelope.is_eligible(now))
    }

    /// Highest tier with an eligible envelope, and its position.
    fn select(&self, now: Instant) -> Option<(usize, usize)> {
        (0..self.queues.len()).find_map(|rank| self.first_eligible(rank, now).map(|pos| (rank, pos)))
    }

    fn locate(&self, id: &RequestId) -> Option<(usize, usize)> {
        self.queues.iter().enumerate().find_map(|(rank, queue)| {
            queue
                .iter()
                .position(|envelope| envelope.id() == id)
                .map(|pos| (rank, pos))
        })
    }

    /// Outcome when nothing can be selected at `now`.
    fn idle_outcome(&self) -> DispatchOutcome {
        self.queues
            .iter()
            .flatten()
            .map(|envelope| *envelope.eligible_at())
            .min()
            .map_or(DispatchOutcome::Idle, |until| DispatchOutcome::Backoff {
                until,
            })
    }

    fn take(&mut self, rank: usize, pos: usize) -> Option<RequestEnvelope<T>> {
        let mut envelope = self.queues[rank].remove(pos)?;
        envelope.transition(RequestStatus::Running);
        self.running = Some(envelope.id().clone());
        Some(envelope)
    }

    fn remember(&mut self, id: RequestId, status: RequestStatus, capacity: usize) {
        if capacity == 0 {
            self.history.clear();
            return;
        }
        while self.history.len() >= capacity {
            self.history.pop_front();
        }
        self.history.push_back((id, status));
    }

    fn cancel_at(&mut self, rank: usize, pos: usize, capacity: usize) -> Option<RequestId> {
        let mut envelope = self.queues[rank].remove(pos)?;
        envelope.transition(RequestStatus::Cancelled);
        let id = envelope.id().clone();
        envelope.resolve(Err(QueueError::new(QueueErrorKind::Cancelled(id.to_string())).into()));
        self.stats.total_cancelled += 1;
        self.remember(id.clone(), RequestStatus::Cancelled, capacity);
        Some(id)
    }
}

pub(crate) struct Shared<T> {
    tiers: Mutex<Tiers<T>>,
    admission: AdmissionController,
    config: QueueConfig,
    backoff: BackoffPolicy,
    pub(crate) dispatch_lock: Arc<Mutex<()>>,
    pub(crate) notify: Notify,
    pub(crate) processing: AtomicBool,
}

/// Priority queue in front of a quota-limited API.
///
/// Cloning is cheap; clones share the same queue, so producers can hold their
/// own handle.
///
/// # Example
///
/// ```
/// use sluice_core::{Priority, ResourceCost};
/// use sluice_queue::{Attempt, DispatchOutcome, PriorityDispatcher};
/// use sluice_rate_limit::{AdmissionConfig, AdmissionController, QueueConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dispatcher = PriorityDispatcher::new(
///     AdmissionController::new(AdmissionConfig::default()),
///     QueueConfig::default(),
/// );
///
/// let ticket = dispatcher
///     .submit(|| async { Attempt::ok(42) }, ResourceCost::default(), Priority::High, 2)
///     .await?;
///
/// let outcome = dispatcher.dispatch_once().await?;
/// assert!(matches!(outcome, DispatchOutcome::Completed { .. }));
/// assert_eq!(ticket.outcome().await?, 42);
/// # Ok(())
/// # }
/// ```
pub struct PriorityDispatcher<T> {
    pub(crate) shared: Arc<Shared<T>>,
}

impl<T> Clone for PriorityDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for PriorityDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityDispatcher")
            .field("config", &self.shared.config)
            .field("processing", &self.shared.processing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> PriorityDispatcher<T> {
    /// Create a dispatcher gated by `admission`.
    pub fn new(admission: AdmissionController, config: QueueConfig) -> Self {
        let backoff = BackoffPolicy::from_config(&config);
        Self::with_backoff(admission, config, backoff)
    }

    /// Create a dispatcher with an explicit backoff policy.
    #[instrument(skip(admission, backoff))]
    pub fn with_backoff(
        admission: AdmissionController,
        config: QueueConfig,
        backoff: BackoffPolicy,
    ) -> Self {
        debug!("Creating priority dispatcher");
        Self {
            shared: Arc::new(Shared {
                tiers: Mutex::new(Tiers::new()),
                admission,
                config,
                backoff,
                dispatch_lock: Arc::new(Mutex::new(())),
                notify: Notify::new(),
                processing: AtomicBool::new(false),
            }),
        }
    }

    /// Admission controller consulted before every attempt.
    pub fn admission(&self) -> &AdmissionController {
        &self.shared.admission
    }

    /// Queue settings.
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Accept a request and return its id immediately.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when `max_queue_size` requests are already queued
    /// or running. The request is rejected, never silently dropped.
    pub async fn enqueue(
        &self,
        operation: impl Operation<T> + 'static,
        cost: ResourceCost,
        priority: Priority,
        max_retries: u32,
    ) -> SluiceResult<RequestId> {
        self.push(Box::new(operation), cost, priority, max_retries, None)
            .await
    }

    /// Accept a request with the configured default retry budget.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` at capacity.
    pub async fn enqueue_default(
        &self,
        operation: impl Operation<T> + 'static,
        cost: ResourceCost,
        priority: Priority,
    ) -> SluiceResult<RequestId> {
        let max_retries = self.shared.config.default_max_retries;
        self.enqueue(operation, cost, priority, max_retries).await
    }

    /// Accept a request and return a ticket that resolves with its outcome.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` at capacity.
    pub async fn submit(
        &self,
        operation: impl Operation<T> + 'static,
        cost: ResourceCost,
        priority: Priority,
        max_retries: u32,
    ) -> SluiceResult<RequestTicket<T>> {
        let (sender, receiver) = oneshot::channel();
        let id = self
            .push(Box::new(operation), cost, priority, max_retries, Some(sender))
            .await?;
        Ok(RequestTicket::new(id, receiver))
    }

    #[instrument(skip(self, operation, responder), fields(tokens = cost.tokens()))]
    async fn push(
        &self,
        operation: Box<dyn Operation<T>>,
        cost: ResourceCost,
        priority: Priority,
        max_retries: u32,
        responder: Option<oneshot::Sender<SluiceResult<T>>>,
    ) -> SluiceResult<RequestId> {
        let max = self.shared.config.max_queue_size;
        let id = {
            let mut tiers = self.shared.tiers.lock().await;
            let size = tiers.in_flight();
            if size >= max {
                warn!(size, max, "Queue full, rejecting request");
                Err(QueueError::new(QueueErrorKind::Full { size, max }))?
            }

            tiers.sequence += 1;
            let id = RequestId::new(chrono::Utc::now().timestamp(), tiers.sequence);
            let envelope =
                RequestEnvelope::new(id.clone(), operation, cost, priority, max_retries, responder);
            tiers.queues[priority.rank()].push_back(envelope);
            tiers.stats.total_queued += 1;
            id
        };

        debug!(%id, %priority, "Request queued");
        self.shared.notify.notify_one();
        Ok(id)
    }

    /// Run at most one attempt.
    ///
    /// Selects the oldest eligible request from the highest non-empty tier,
    /// gates it through admission control according to the configured
    /// [`AdmissionMode`], runs it, and applies the outcome. Only one
    /// dispatch runs at a time per dispatcher.
    ///
    /// Dropping the returned future never strands a request: once one is
    /// taken, its attempt runs to completion on its own task.
    ///
    /// # Errors
    ///
    /// Returns quota errors other than `QuotaExceeded`; in practice the
    /// outcome is reported through [`DispatchOutcome`].
    pub async fn dispatch_once(&self) -> SluiceResult<DispatchOutcome> {
        let consumer = self.consumer().await;
        match self.select_next().await? {
            Selection::Ready(envelope) => Ok(self.execute(envelope, consumer).await),
            Selection::Empty(outcome) => Ok(outcome),
        }
    }

    /// Acquire the single-consumer lock.
    pub(crate) async fn consumer(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.shared.dispatch_lock).lock_owned().await
    }

    /// Pick the next request and debit its cost.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves every
    /// request where it was. Callers must hold the dispatch lock.
    pub(crate) async fn select_next(&self) -> SluiceResult<Selection<T>> {
        match self.shared.config.admission_mode {
            AdmissionMode::Wait => self.select_waiting().await,
            AdmissionMode::Defer => Ok(self.select_deferring().await),
        }
    }

    async fn select_waiting(&self) -> SluiceResult<Selection<T>> {
        loop {
            let (id, cost) = {
                let tiers = self.shared.tiers.lock().await;
                match tiers.select(Instant::now()) {
                    Some((rank, pos)) => {
                        let envelope = &tiers.queues[rank][pos];
                        (envelope.id().clone(), *envelope.cost())
                    }
                    None => return Ok(Selection::Empty(tiers.idle_outcome())),
                }
            };

            if let Err(e) = self.shared.admission.wait_if_needed(&cost).await {
                let Some(wait) = exceeded_wait(&e) else {
                    return Err(e);
                };
                debug!(%id, wait_ms = wait.as_millis() as u64, "Required wait exceeds bound, deferring");
                return Ok(Selection::Empty(DispatchOutcome::Deferred { wait }));
            }

            let mut tiers = self.shared.tiers.lock().await;
            // The head may have changed while we slept.
            let Some((rank, pos)) = tiers.select(Instant::now()) else {
                return Ok(Selection::Empty(tiers.idle_outcome()));
            };
            if tiers.queues[rank][pos].id() != &id {
                debug!(%id, "Selection changed while waiting, re-evaluating");
                continue;
            }
            if !self.shared.admission.state().try_debit(&cost).await {
                debug!(%id, "Quota spent while waiting, re-evaluating");
                continue;
            }
            if let Some(envelope) = tiers.take(rank, pos) {
                return Ok(Selection::Ready(envelope));
            }
        }
    }

    async fn select_deferring(&self) -> Selection<T> {
        let mut tiers = self.shared.tiers.lock().await;
        let now = Instant::now();
        let mut shortest: Option<Duration> = None;

        for rank in 0..tiers.queues.len() {
            let Some(pos) = tiers.first_eligible(rank, now) else {
                continue;
            };
            let cost = *tiers.queues[rank][pos].cost();
            if self.shared.admission.state().try_debit(&cost).await {
                if let Some(envelope) = tiers.take(rank, pos) {
                    return Selection::Ready(envelope);
                }
            }
            let wait = self.shared.admission.wait_time(&cost).await;
            debug!(
                id = %tiers.queues[rank][pos].id(),
                wait_ms = wait.as_millis() as u64,
                "Head of tier not admissible, trying lower tier"
            );
            shortest = Some(shortest.map_or(wait, |current| current.min(wait)));
        }

        match shortest {
            Some(wait) => Selection::Empty(DispatchOutcome::Deferred { wait }),
            None => Selection::Empty(tiers.idle_outcome()),
        }
    }

    /// Run one attempt of an already selected request and apply the result.
    ///
    /// The attempt runs on its own task, holding `consumer` until the
    /// outcome is applied.
    pub(crate) async fn execute(
        &self,
        envelope: RequestEnvelope<T>,
        consumer: OwnedMutexGuard<()>,
    ) -> DispatchOutcome {
        let id = envelope.id().clone();
        let dispatcher = self.clone();
        let attempt = tokio::spawn(async move {
            let _consumer = consumer;
            dispatcher.run_attempt(envelope).await
        });

        match attempt.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%id, error = %e, "Attempt task ended abnormally");
                let history_size = self.shared.config.history_size;
                let mut tiers = self.shared.tiers.lock().await;
                if tiers.running.as_ref() == Some(&id) {
                    tiers.running = None;
                    tiers.stats.total_failed += 1;
                    tiers.remember(id.clone(), RequestStatus::Failed, history_size);
                }
                DispatchOutcome::Completed {
                    id,
                    status: RequestStatus::Failed,
                }
            }
        }
    }

    #[instrument(skip(self, envelope), fields(id = %envelope.id(), priority = %envelope.priority()))]
    async fn run_attempt(&self, mut envelope: RequestEnvelope<T>) -> DispatchOutcome {
        self.shared.admission.pace().await;
        debug!(attempt = envelope.attempts(), "Running request");
        let Attempt { result, signal } = AssertUnwindSafe(envelope.operation().call())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                Attempt::err(OperationError::new(OperationErrorKind::Panicked(message)))
            });

        if let Some(signal) = signal.as_ref() {
            if let Err(e) = self.shared.admission.record_outcome(Some(signal)).await {
                warn!(error = %e, "Ignoring malformed quota signal");
            }
        }

        let history_size = self.shared.config.history_size;
        let mut tiers = self.shared.tiers.lock().await;
        tiers.running = None;
        let id = envelope.id().clone();

        match result {
            Ok(value) => {
                envelope.transition(RequestStatus::Succeeded);
                envelope.resolve(Ok(value));
                tiers.stats.total_processed += 1;
                tiers.remember(id.clone(), RequestStatus::Succeeded, history_size);
                DispatchOutcome::Completed {
                    id,
                    status: RequestStatus::Succeeded,
                }
            }
            Err(e) if e.is_retryable() && envelope.can_retry() => {
                let delay = self
                    .shared
                    .backoff
                    .next_delay(envelope.retries_attempted() + 1, e.kind().retry_after());
                let retry_at = Instant::now() + delay;
                envelope.schedule_retry(retry_at);
                warn!(
                    error = %e,
                    retry = envelope.retries_attempted(),
                    max_retries = envelope.max_retries(),
                    delay_ms = delay.as_millis() as u64,
                    "Retryable failure, requeueing"
                );
                tiers.stats.total_retries += 1;
                tiers.queues[envelope.priority().rank()].push_back(envelope);
                DispatchOutcome::Retrying { id, retry_at }
            }
            Err(e) => {
                let attempts = envelope.attempts();
                envelope.transition(RequestStatus::Failed);
                let error = if e.is_retryable() {
                    OperationError::new(OperationErrorKind::RetriesExhausted {
                        attempts,
                        last: e.kind().to_string(),
                    })
                } else {
                    e
                };
                warn!(error = %error, attempts, "Request failed");
                envelope.resolve(Err(error.into()));
                tiers.stats.total_failed += 1;
                tiers.remember(id.clone(), RequestStatus::Failed, history_size);
                DispatchOutcome::Completed {
                    id,
                    status: RequestStatus::Failed,
                }
            }
        }
    }

    /// Dispatch until nothing is queued, sleeping through backoffs and
    /// quota waits.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`dispatch_once`](Self::dispatch_once).
    pub async fn run_until_idle(&self) -> SluiceResult<QueueStats> {
        loop {
            match self.dispatch_once().await? {
                DispatchOutcome::Idle => break,
                DispatchOutcome::Backoff { until } => tokio::time::sleep_until(until).await,
                DispatchOutcome::Deferred { wait } => tokio::time::sleep(wait).await,
                DispatchOutcome::Completed { .. } | DispatchOutcome::Retrying { .. } => {}
            }
        }
        Ok(self.status().await.stats)
    }

    /// Remove a queued request.
    ///
    /// # Errors
    ///
    /// Returns `NotCancellable` if it is running and `UnknownRequest` if no
    /// queued or running request has this id.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &RequestId) -> SluiceResult<()> {
        let history_size = self.shared.config.history_size;
        let mut tiers = self.shared.tiers.lock().await;
        if tiers.running.as_ref() == Some(id) {
            Err(QueueError::new(QueueErrorKind::NotCancellable(id.to_string())))?
        }
        let Some((rank, pos)) = tiers.locate(id) else {
            return Err(QueueError::new(QueueErrorKind::UnknownRequest(id.to_string())).into());
        };
        tiers.cancel_at(rank, pos, history_size);
        debug!("Request cancelled");
        Ok(())
    }

    /// Remove every queued request, or only those of one tier.
    ///
    /// The running request is unaffected. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn clear_queue(&self, priority: Option<Priority>) -> usize {
        let history_size = self.shared.config.history_size;
        let mut tiers = self.shared.tiers.lock().await;
        let ranks: Vec<usize> = match priority {
            Some(priority) => vec![priority.rank()],
            None => (0..tiers.queues.len()).collect(),
        };

        let mut removed = 0;
        for rank in ranks {
            while tiers.cancel_at(rank, 0, history_size).is_some() {
                removed += 1;
            }
        }
        debug!(removed, "Queue cleared");
        removed
    }

    /// Current status of a request.
    ///
    /// Terminal statuses are remembered for the most recent `history_size`
    /// requests; older ids return `None`.
    pub async fn request_status(&self, id: &RequestId) -> Option<RequestStatus> {
        let tiers = self.shared.tiers.lock().await;
        if tiers.running.as_ref() == Some(id) {
            return Some(RequestStatus::Running);
        }
        if let Some((rank, pos)) = tiers.locate(id) {
            return Some(*tiers.queues[rank][pos].status());
        }
        tiers
            .history
            .iter()
            .rev()
            .find(|(past, _)| past == id)
            .map(|(_, status)| *status)
    }

    /// Point-in-time view of the queue.
    pub async fn status(&self) -> QueueStatus {
        let tiers = self.shared.tiers.lock().await;
        QueueStatus {
            tiers: tiers.sizes(),
            total: tiers.in_flight(),
            running: tiers.running.clone(),
            processing: self.shared.processing.load(Ordering::SeqCst),
            stats: tiers.stats,
            max_queue_size: self.shared.config.max_queue_size,
        }
    }

    /// Number of queued or running requests.
    pub async fn len(&self) -> usize {
        self.shared.tiers.lock().await.in_flight()
    }

    /// Whether nothing is queued or running.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

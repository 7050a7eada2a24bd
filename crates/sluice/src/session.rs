//! A configured admission controller and dispatcher pair.

use reqwest::header::HeaderMap;
use sluice_core::{Priority, RequestId, RequestStatus, ResourceCost};
use sluice_error::SluiceResult;
use sluice_queue::{
    BackoffPolicy, DispatcherHandle, Operation, PriorityDispatcher, QueueStatus, RequestTicket,
};
use sluice_rate_limit::{
    AdmissionController, QuotaReport, QuotaState, QuotaSummary, QuotaUpdate, SluiceConfig,
    signal_from_headers,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Everything needed to gate and schedule calls against one remote API.
///
/// The session owns a single [`QuotaState`] shared by its admission
/// controller and its dispatcher, so quota learned from any call gates every
/// later one. Clones share the same state and queue.
///
/// # Examples
///
/// ```
/// use sluice::{Attempt, Priority, ResourceCost, Sluice, SluiceConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session: Sluice<String> = Sluice::new(SluiceConfig::default())?;
///
/// let ticket = session
///     .submit(
///         || async { Attempt::ok("hello".to_string()) },
///         ResourceCost::text("Say hello", 16),
///         Priority::Normal,
///     )
///     .await?;
///
/// session.dispatcher().run_until_idle().await?;
/// assert_eq!(ticket.outcome().await?, "hello");
/// # Ok(())
/// # }
/// ```
pub struct Sluice<T> {
    config: Arc<SluiceConfig>,
    dispatcher: PriorityDispatcher<T>,
}

impl<T> Clone for Sluice<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Sluice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sluice")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl<T: Send + 'static> Sluice<T> {
    /// Build a session from explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration fails validation.
    #[instrument(skip(config))]
    pub fn new(config: SluiceConfig) -> SluiceResult<Self> {
        config.validate()?;

        let state = Arc::new(QuotaState::new());
        let admission = AdmissionController::with_state(state, config.admission.clone());
        let backoff = BackoffPolicy::from_config(&config.queue);
        let dispatcher = PriorityDispatcher::with_backoff(admission, config.queue.clone(), backoff);

        debug!(
            max_queue_size = config.queue.max_queue_size,
            mode = %config.queue.admission_mode,
            "Session created"
        );
        Ok(Self {
            config: Arc::new(config),
            dispatcher,
        })
    }

    /// Build a session from the layered configuration files.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a configuration file is malformed or invalid.
    pub fn load() -> SluiceResult<Self> {
        Self::new(SluiceConfig::load()?)
    }

    /// Effective configuration.
    pub fn config(&self) -> &SluiceConfig {
        &self.config
    }

    /// Admission controller shared with the dispatcher.
    pub fn admission(&self) -> &AdmissionController {
        self.dispatcher.admission()
    }

    /// Underlying dispatcher, for manual `dispatch_once` loops.
    pub fn dispatcher(&self) -> &PriorityDispatcher<T> {
        &self.dispatcher
    }

    /// Queue an operation with the configured retry budget.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` at capacity.
    pub async fn enqueue(
        &self,
        operation: impl Operation<T> + 'static,
        cost: ResourceCost,
        priority: Priority,
    ) -> SluiceResult<RequestId> {
        self.dispatcher
            .enqueue_default(operation, cost, priority)
            .await
    }

    /// Queue an operation with an explicit retry budget.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` at capacity.
    pub async fn enqueue_with_retries(
        &self,
        operation: impl Operation<T> + 'static,
        cost: ResourceCost,
        priority: Priority,
        max_retries: u32,
    ) -> SluiceResult<RequestId> {
        self.dispatcher
            .enqueue(operation, cost, priority, max_retries)
            .await
    }

    /// Queue an operation and get a ticket for its result.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` at capacity.
    pub async fn submit(
        &self,
        operation: impl Operation<T> + 'static,
        cost: ResourceCost,
        priority: Priority,
    ) -> SluiceResult<RequestTicket<T>> {
        let max_retries = self.config.queue.default_max_retries;
        self.dispatcher
            .submit(operation, cost, priority, max_retries)
            .await
    }

    /// Remove a queued request.
    ///
    /// # Errors
    ///
    /// Returns `NotCancellable` if it is running and `UnknownRequest` if it is
    /// not queued.
    pub async fn cancel(&self, id: &RequestId) -> SluiceResult<()> {
        self.dispatcher.cancel(id).await
    }

    /// Status of one request, if it is still known.
    pub async fn request_status(&self, id: &RequestId) -> Option<RequestStatus> {
        self.dispatcher.request_status(id).await
    }

    /// Start the background worker.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyProcessing` if a worker is already running.
    pub fn start(&self) -> SluiceResult<DispatcherHandle> {
        self.dispatcher.spawn()
    }

    /// Apply the rate limit headers of a response made outside the queue.
    ///
    /// Returns `None` when the response carried no rate limit headers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignal` if a rate limit header is malformed; the quota
    /// state is left unchanged.
    #[instrument(skip_all)]
    pub async fn observe_headers(&self, headers: &HeaderMap) -> SluiceResult<Option<QuotaUpdate>> {
        let signal = signal_from_headers(headers)?;
        self.admission().record_outcome(signal.as_ref()).await
    }

    /// Serializable view of the quota state.
    pub async fn quota_snapshot(&self) -> QuotaReport {
        self.admission().snapshot().await.report()
    }

    /// Quota usage overview, including whether a refresh is due.
    pub async fn quota_summary(&self) -> QuotaSummary {
        self.admission().summary().await
    }

    /// Serializable view of the queue.
    pub async fn status(&self) -> QueueStatus {
        self.dispatcher.status().await
    }
}

//! Bookkeeping record for one pending request.

use crate::Operation;
use sluice_core::{Priority, RequestId, RequestStatus, ResourceCost};
use sluice_error::SluiceResult;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// A request owned by the dispatcher until it reaches a terminal state.
#[derive(derive_getters::Getters)]
pub struct RequestEnvelope<T> {
    /// Assigned at enqueue time
    id: RequestId,
    /// Tier it is served from
    priority: Priority,
    /// Quota it consumes per attempt
    cost: ResourceCost,
    #[getter(skip)]
    operation: Box<dyn Operation<T>>,
    /// Retries performed so far
    retries_attempted: u32,
    /// Retry budget
    max_retries: u32,
    /// When it was accepted
    enqueued_at: Instant,
    /// Earliest instant it may be selected
    eligible_at: Instant,
    /// Lifecycle position
    status: RequestStatus,
    #[getter(skip)]
    responder: Option<oneshot::Sender<SluiceResult<T>>>,
}

impl<T> RequestEnvelope<T> {
    pub(crate) fn new(
        id: RequestId,
        operation: Box<dyn Operation<T>>,
        cost: ResourceCost,
        priority: Priority,
        max_retries: u32,
        responder: Option<oneshot::Sender<SluiceResult<T>>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            priority,
            cost,
            operation,
            retries_attempted: 0,
            max_retries,
            enqueued_at: now,
            eligible_at: now,
            status: RequestStatus::Queued,
            responder,
        }
    }

    /// Attempts made so far, counting the one in flight.
    pub fn attempts(&self) -> u32 {
        match self.status {
            RequestStatus::Running | RequestStatus::Succeeded | RequestStatus::Failed => {
                self.retries_attempted + 1
            }
            _ => self.retries_attempted,
        }
    }

    /// Whether another retry fits the budget.
    pub fn can_retry(&self) -> bool {
        self.retries_attempted < self.max_retries
    }

    /// Whether the backoff gate has opened at `now`.
    pub fn is_eligible(&self, now: Instant) -> bool {
        self.eligible_at <= now
    }

    pub(crate) fn operation(&self) -> &dyn Operation<T> {
        self.operation.as_ref()
    }

    pub(crate) fn transition(&mut self, next: RequestStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {} -> {}",
            self.status,
            next
        );
        debug!(id = %self.id, from = %self.status, to = %next, "Request status changed");
        self.status = next;
    }

    /// Put a failed attempt back in line, gated until `eligible_at`.
    pub(crate) fn schedule_retry(&mut self, eligible_at: Instant) {
        self.retries_attempted += 1;
        self.eligible_at = eligible_at;
        self.transition(RequestStatus::Queued);
    }

    /// Deliver the terminal outcome to whoever holds the ticket.
    pub(crate) fn resolve(&mut self, outcome: SluiceResult<T>) {
        if let Some(responder) = self.responder.take() {
            // The ticket may have been dropped; nobody is waiting then.
            let _ = responder.send(outcome);
        }
    }
}

impl<T> std::fmt::Debug for RequestEnvelope<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEnvelope")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("cost", &self.cost)
            .field("retries_attempted", &self.retries_attempted)
            .field("max_retries", &self.max_retries)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

//! Handle for awaiting a submitted request.

use sluice_core::RequestId;
use sluice_error::{QueueError, QueueErrorKind, SluiceResult};
use tokio::sync::oneshot;

/// Resolves once the request reaches a terminal state.
///
/// Dropping the ticket does not cancel the request; use
/// [`PriorityDispatcher::cancel`](crate::PriorityDispatcher::cancel) for that.
#[derive(Debug)]
pub struct RequestTicket<T> {
    id: RequestId,
    receiver: oneshot::Receiver<SluiceResult<T>>,
}

impl<T> RequestTicket<T> {
    pub(crate) fn new(id: RequestId, receiver: oneshot::Receiver<SluiceResult<T>>) -> Self {
        Self { id, receiver }
    }

    /// Id assigned at enqueue time.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns the operation's final error, `Cancelled` if the request was
    /// removed before running, or `Stopped` if the dispatcher was dropped
    /// while the request was still pending.
    pub async fn outcome(self) -> SluiceResult<T> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(QueueError::new(QueueErrorKind::Stopped))?,
        }
    }
}

//! Background worker draining a dispatcher.

use crate::dispatcher::Selection;
use crate::{DispatchOutcome, PriorityDispatcher};
use sluice_error::{QueueError, QueueErrorKind, SluiceResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pause after an unexpected dispatch error before trying again.
const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Clears the processing flag when the worker task ends, however it ends.
struct ProcessingFlag<'a>(&'a AtomicBool);

impl Drop for ProcessingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a running background worker.
///
/// Dropping the handle also stops the worker, without waiting for it to
/// finish.
#[derive(Debug)]
pub struct DispatcherHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Ask the worker to stop and wait for it to finish.
    ///
    /// A request already running is allowed to complete; queued requests
    /// stay queued.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Dispatcher worker ended abnormally");
        }
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T: Send + 'static> PriorityDispatcher<T> {
    /// Start a background worker that dispatches as long as there is work.
    ///
    /// The worker sleeps while the queue is empty and wakes on enqueue. It
    /// also sleeps through retry backoffs and quota deferrals.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyProcessing` if a worker is already running for this
    /// dispatcher.
    pub fn spawn(&self) -> SluiceResult<DispatcherHandle> {
        if self.shared.processing.swap(true, Ordering::SeqCst) {
            Err(QueueError::new(QueueErrorKind::AlreadyProcessing))?
        }

        let (stop, stopped) = watch::channel(false);
        let dispatcher = self.clone();
        let task = tokio::spawn(async move {
            let _processing = ProcessingFlag(&dispatcher.shared.processing);
            info!("Dispatcher worker started");
            dispatcher.work(stopped).await;
            info!("Dispatcher worker stopped");
        });

        Ok(DispatcherHandle { stop, task })
    }

    async fn work(&self, mut stopped: watch::Receiver<bool>) {
        loop {
            if *stopped.borrow() {
                return;
            }

            let consumer = tokio::select! {
                _ = stopped.changed() => return,
                guard = self.consumer() => guard,
            };

            // Stop is only observed before a request is taken; a taken
            // request always runs to completion.
            let selection = tokio::select! {
                _ = stopped.changed() => return,
                selection = self.select_next() => selection,
            };

            let outcome = match selection {
                Ok(Selection::Ready(envelope)) => self.execute(envelope, consumer).await,
                Ok(Selection::Empty(outcome)) => {
                    drop(consumer);
                    outcome
                }
                Err(e) => {
                    warn!(error = %e, "Dispatch failed");
                    drop(consumer);
                    tokio::select! {
                        _ = stopped.changed() => return,
                        _ = tokio::time::sleep(ERROR_PAUSE) => {}
                    }
                    continue;
                }
            };

            match outcome {
                DispatchOutcome::Idle => {
                    debug!("Queue empty, waiting for work");
                    tokio::select! {
                        _ = stopped.changed() => return,
                        _ = self.shared.notify.notified() => {}
                    }
                }
                DispatchOutcome::Backoff { until } => {
                    tokio::select! {
                        _ = stopped.changed() => return,
                        _ = self.shared.notify.notified() => {}
                        _ = tokio::time::sleep_until(until) => {}
                    }
                }
                DispatchOutcome::Deferred { wait } => {
                    tokio::select! {
                        _ = stopped.changed() => return,
                        _ = self.shared.notify.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                DispatchOutcome::Completed { .. } | DispatchOutcome::Retrying { .. } => {}
            }
        }
    }
}

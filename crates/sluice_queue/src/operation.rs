//! The unit of work a dispatcher runs.

use async_trait::async_trait;
use sluice_core::QuotaSignal;
use sluice_error::OperationError;
use std::future::Future;

/// Result of one call plus whatever quota information came back with it.
///
/// The signal is reported on failures too: a 429 response usually carries
/// the most useful rate limit headers of all.
#[derive(Debug)]
pub struct Attempt<T> {
    /// What the call produced
    pub result: Result<T, OperationError>,
    /// Quota reported alongside the response, if any
    pub signal: Option<QuotaSignal>,
}

impl<T> Attempt<T> {
    /// Successful call without quota information.
    pub fn ok(value: T) -> Self {
        Self {
            result: Ok(value),
            signal: None,
        }
    }

    /// Failed call without quota information.
    pub fn err(error: OperationError) -> Self {
        Self {
            result: Err(error),
            signal: None,
        }
    }

    /// Attach the quota signal observed on the response.
    pub fn with_signal(mut self, signal: QuotaSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Attach an optional quota signal, e.g. straight from header parsing.
    pub fn with_optional_signal(mut self, signal: Option<QuotaSignal>) -> Self {
        self.signal = signal;
        self
    }
}

impl<T> From<Result<T, OperationError>> for Attempt<T> {
    fn from(result: Result<T, OperationError>) -> Self {
        Self {
            result,
            signal: None,
        }
    }
}

/// A call against the remote API, runnable any number of times.
///
/// The dispatcher calls it once per attempt, so retries re-run the same
/// operation. Async closures returning an [`Attempt`] implement it:
///
/// ```
/// use sluice_queue::{Attempt, Operation};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let operation = || async { Attempt::ok("transcript") };
/// let attempt = operation.call().await;
/// assert_eq!(attempt.result.unwrap(), "transcript");
/// # }
/// ```
#[async_trait]
pub trait Operation<T>: Send + Sync {
    /// Perform one attempt.
    async fn call(&self) -> Attempt<T>;
}

#[async_trait]
impl<T, F, Fut> Operation<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Attempt<T>> + Send,
{
    async fn call(&self) -> Attempt<T> {
        (self)().await
    }
}

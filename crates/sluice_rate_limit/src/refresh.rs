//! Injected capability for fetching fresh quota information.

use async_trait::async_trait;
use sluice_core::QuotaSignal;
use sluice_error::SluiceResult;
use std::future::Future;

/// Source of authoritative quota information.
///
/// Typically a cheap call against the remote API whose response headers are
/// parsed with [`signal_from_headers`](crate::signal_from_headers). Any async
/// closure returning a `SluiceResult<QuotaSignal>` is a refresher:
///
/// ```
/// use sluice_core::{Dimension, DimensionSignal, QuotaSignal};
/// use sluice_error::SluiceError;
/// use sluice_rate_limit::QuotaState;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let refresher = || async {
///     Ok::<_, SluiceError>(QuotaSignal::new().with(
///         Dimension::Requests,
///         DimensionSignal::default().with_limit(30).with_remaining(30),
///     ))
/// };
///
/// let state = QuotaState::new();
/// state.force_refresh(&refresher).await?;
/// assert!(*state.snapshot().await.has_info());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait QuotaRefresher: Send + Sync {
    /// Fetch the current quota.
    async fn fetch_quota(&self) -> SluiceResult<QuotaSignal>;
}

#[async_trait]
impl<F, Fut> QuotaRefresher for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = SluiceResult<QuotaSignal>> + Send,
{
    async fn fetch_quota(&self) -> SluiceResult<QuotaSignal> {
        (self)().await
    }
}

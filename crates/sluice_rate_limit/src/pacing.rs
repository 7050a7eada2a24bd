//! Client-side request pacing.
//!
//! Server-reported quota only tells us about a window after we have spent
//! part of it. A local GCRA limiter spreads requests evenly so bursts do not
//! drain a fresh window in the first second.

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Requests-per-minute ceiling enforced on our side of the wire.
pub struct LocalPacer {
    limiter: DirectRateLimiter,
    rpm: NonZeroU32,
}

impl LocalPacer {
    /// Pacer allowing `rpm` requests per minute; `None` for zero.
    pub fn per_minute(rpm: u32) -> Option<Self> {
        let rpm = NonZeroU32::new(rpm)?;
        Some(Self {
            limiter: RateLimiter::direct(Quota::per_minute(rpm)),
            rpm,
        })
    }

    /// Configured requests per minute.
    pub fn rpm(&self) -> u32 {
        self.rpm.get()
    }

    /// Wait for the next slot.
    pub async fn until_ready(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a slot without waiting, or report how long until one frees up.
    pub fn check(&self) -> Result<(), Duration> {
        self.limiter.check().map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            debug!(wait_ms = wait.as_millis() as u64, "Local pacing slot unavailable");
            wait
        })
    }
}

impl std::fmt::Debug for LocalPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPacer").field("rpm", &self.rpm).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rpm_disables_pacing() {
        assert!(LocalPacer::per_minute(0).is_none());
    }

    #[test]
    fn test_burst_then_wait() {
        let pacer = LocalPacer::per_minute(2).unwrap();
        assert!(pacer.check().is_ok());
        assert!(pacer.check().is_ok());
        let wait = pacer.check().unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(30));
    }
}

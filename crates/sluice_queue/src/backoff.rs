//! Retry delay schedule.

use sluice_rate_limit::QueueConfig;
use std::time::Duration;
use tokio_retry2::strategy::jitter;

/// Exponential backoff: `base * 2^retries`, capped at `max`.
///
/// # Examples
///
/// ```
/// use sluice_queue::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
/// assert_eq!(policy.delay_for(1), Duration::from_secs(2));
/// assert_eq!(policy.delay_for(3), Duration::from_secs(8));
/// assert_eq!(policy.delay_for(10), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_getters::Getters)]
pub struct BackoffPolicy {
    /// Delay unit before doubling
    base_delay: Duration,
    /// Ceiling on any delay
    max_delay: Duration,
    /// Randomize delays
    jitter: bool,
}

impl BackoffPolicy {
    /// Deterministic policy.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    /// Policy described by the queue configuration.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay()).with_jitter(config.jitter)
    }

    /// Toggle randomized delays.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Capped delay after `retries_attempted` retries, before jitter.
    pub fn delay_for(&self, retries_attempted: u32) -> Duration {
        let factor = 1u32.checked_shl(retries_attempted).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next attempt.
    ///
    /// A server supplied `retry_after` hint is a floor: we never come back
    /// sooner than the remote API asked.
    pub fn next_delay(&self, retries_attempted: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay_for(retries_attempted);
        let delay = if self.jitter { jitter(delay) } else { delay };
        delay.max(retry_after.unwrap_or_default())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huge_retry_counts_saturate() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(31), Duration::from_secs(60));
        assert_eq!(policy.delay_for(32), Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_after_is_a_floor() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(60));
        assert_eq!(
            policy.next_delay(1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.next_delay(1, Some(Duration::from_millis(50))),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn test_jitter_respects_retry_after() {
        let policy =
            BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(4)).with_jitter(true);
        for _ in 0..20 {
            assert!(policy.next_delay(2, Some(Duration::from_secs(3))) >= Duration::from_secs(3));
        }
    }
}

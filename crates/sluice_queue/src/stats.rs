//! Dispatcher counters and status reports.

use serde::Serialize;
use sluice_core::{Priority, RequestId};

/// Lifetime counters. Every field only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Requests accepted by `enqueue`
    pub total_queued: u64,
    /// Requests that succeeded
    pub total_processed: u64,
    /// Requests that failed for good
    pub total_failed: u64,
    /// Retries scheduled after retryable failures
    pub total_retries: u64,
    /// Requests removed before they ran
    pub total_cancelled: u64,
}

/// Queued requests per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierSizes {
    /// Urgent tier
    pub urgent: usize,
    /// High tier
    pub high: usize,
    /// Normal tier
    pub normal: usize,
    /// Low tier
    pub low: usize,
}

impl TierSizes {
    /// Size of one tier.
    pub fn get(&self, priority: Priority) -> usize {
        match priority {
            Priority::Urgent => self.urgent,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }

    /// Queued requests across all tiers.
    pub fn total(&self) -> usize {
        self.urgent + self.high + self.normal + self.low
    }

    pub(crate) fn set(&mut self, priority: Priority, size: usize) {
        match priority {
            Priority::Urgent => self.urgent = size,
            Priority::High => self.high = size,
            Priority::Normal => self.normal = size,
            Priority::Low => self.low = size,
        }
    }
}

/// Point-in-time view of a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Queued requests per tier
    pub tiers: TierSizes,
    /// Non-terminal requests: queued plus running
    pub total: usize,
    /// Request currently in flight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<RequestId>,
    /// Whether a background worker is draining the queue
    pub processing: bool,
    /// Lifetime counters
    pub stats: QueueStats,
    /// Capacity
    pub max_queue_size: usize,
}

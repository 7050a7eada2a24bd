//! Priority dispatching for quota-limited API calls.
//!
//! A [`PriorityDispatcher`] holds four FIFO tiers (urgent, high, normal,
//! low). Producers [`enqueue`](PriorityDispatcher::enqueue) or
//! [`submit`](PriorityDispatcher::submit) operations from any task; a single
//! consumer, either manual [`dispatch_once`](PriorityDispatcher::dispatch_once)
//! calls or the background worker started by
//! [`spawn`](PriorityDispatcher::spawn), drains them.
//!
//! ## Lifecycle
//!
//! ```text
//! queued -> running -> succeeded
//!              |-----> queued     (retryable failure, after backoff)
//!              '-----> failed     (permanent failure or retries exhausted)
//! queued -> cancelled
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod dispatcher;
mod envelope;
mod operation;
mod stats;
mod ticket;
mod worker;

pub use backoff::BackoffPolicy;
pub use dispatcher::{DispatchOutcome, PriorityDispatcher};
pub use envelope::RequestEnvelope;
pub use operation::{Attempt, Operation};
pub use stats::{QueueStats, QueueStatus, TierSizes};
pub use ticket::RequestTicket;
pub use worker::DispatcherHandle;

//! Sluice - quota-aware admission control and priority dispatch.
//!
//! Sluice sits between application code and a quota-limited inference API.
//! It tracks the API's request, token and audio-second quotas, holds calls
//! back until they fit, and drains pending work through four priority tiers
//! with retry and backoff.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sluice::{Attempt, Priority, ResourceCost, Sluice};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session: Sluice<String> = Sluice::load()?;
//!     let worker = session.start()?;
//!
//!     let ticket = session
//!         .submit(
//!             || async { Attempt::ok("transcript".to_string()) },
//!             ResourceCost::transcription(42),
//!             Priority::High,
//!         )
//!         .await?;
//!     println!("{}", ticket.outcome().await?);
//!
//!     worker.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! Sluice is organized as a workspace with focused crates:
//!
//! - `sluice_error` - Error types
//! - `sluice_core` - Dimensions, costs, priorities, request identity, quota signals
//! - `sluice_rate_limit` - Quota state, admission control, header parsing, configuration
//! - `sluice_queue` - Priority dispatcher, retry policy, background worker
//!
//! This crate (`sluice`) re-exports everything for convenience and adds the
//! [`Sluice`] session type.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod observability;
mod session;

pub use observability::{ObservabilityConfig, init_observability, init_observability_with_config};
pub use session::Sluice;

// Error types
pub use sluice_error::{
    ConfigError, ConfigErrorKind, OperationError, OperationErrorKind, QueueError, QueueErrorKind,
    QuotaError, QuotaErrorKind, RetryableError, SluiceError, SluiceErrorKind, SluiceResult,
};

// Core vocabulary
pub use sluice_core::{
    Dimension, DimensionSignal, Priority, QuotaSignal, RequestId, RequestStatus, ResourceCost,
    estimate_tokens,
};

// Admission control
pub use sluice_rate_limit::{
    AdmissionConfig, AdmissionController, AdmissionMode, DimensionQuota, DimensionReport,
    DimensionUsage, LimitChange, LocalPacer, QueueConfig, QuotaRefresher, QuotaReport,
    QuotaSnapshot, QuotaState, QuotaSummary, QuotaUpdate, SluiceConfig, parse_reset_duration,
    signal_from_headers,
};

// Dispatch
pub use sluice_queue::{
    Attempt, BackoffPolicy, DispatchOutcome, DispatcherHandle, Operation, PriorityDispatcher,
    QueueStats, QueueStatus, RequestEnvelope, RequestTicket, TierSizes,
};

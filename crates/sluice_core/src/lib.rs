//! Core data types for Sluice.
//!
//! This crate holds the vocabulary shared by the admission controller and the
//! dispatcher: quota dimensions, request costs, priorities, request identity
//! and lifecycle, and the quota signal shape reported by the remote API.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cost;
mod dimension;
mod priority;
mod request;
mod signal;

pub use cost::{ResourceCost, estimate_tokens};
pub use dimension::Dimension;
pub use priority::Priority;
pub use request::{RequestId, RequestStatus};
pub use signal::{DimensionSignal, QuotaSignal};

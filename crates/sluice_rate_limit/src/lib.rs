//! Quota tracking and admission control.
//!
//! This crate keeps the client's view of a remote API's quota and decides
//! whether a call may go out. Quota arrives as [`QuotaSignal`]s, either parsed
//! from response headers with [`signal_from_headers`] or fetched through a
//! [`QuotaRefresher`], and is applied to a shared [`QuotaState`].
//! [`AdmissionController`] reads that state to admit, delay or reject calls.
//!
//! ## Configuration
//!
//! [`SluiceConfig`] is loaded from bundled defaults overlaid with
//! `~/.config/sluice/sluice.toml` and `./sluice.toml`.
//!
//! [`QuotaSignal`]: sluice_core::QuotaSignal

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod admission;
mod config;
mod headers;
mod pacing;
mod quota;
mod refresh;

pub use admission::{AdmissionController, DimensionUsage, QuotaSummary};
pub use config::{AdmissionConfig, AdmissionMode, QueueConfig, SluiceConfig};
pub use headers::{parse_reset_duration, signal_from_headers};
pub use pacing::LocalPacer;
pub use quota::{
    DimensionQuota, DimensionReport, LimitChange, QuotaReport, QuotaSnapshot, QuotaState,
    QuotaUpdate,
};
pub use refresh::QuotaRefresher;

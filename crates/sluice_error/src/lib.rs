//! Error types for Sluice.
//!
//! Every error family follows the same shape:
//! - a `*ErrorKind` enum naming the specific condition
//! - a `*Error` struct wrapping the kind with the source location that raised it
//! - constructors marked `#[track_caller]` so the location is captured automatically
//!
//! All families fold into [`SluiceError`] through `From`, so `?` works across
//! crate boundaries.
//!
//! # Examples
//!
//! ```
//! use sluice_error::{QueueError, QueueErrorKind, SluiceResult};
//!
//! fn admit(size: usize, max: usize) -> SluiceResult<()> {
//!     if size >= max {
//!         Err(QueueError::new(QueueErrorKind::Full { size, max }))?
//!     }
//!     Ok(())
//! }
//!
//! assert!(admit(2, 2).is_err());
//! assert!(admit(1, 2).is_ok());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod operation;
mod queue;
mod quota;

pub use config::{ConfigError, ConfigErrorKind};
pub use error::{SluiceError, SluiceErrorKind, SluiceResult};
pub use operation::{OperationError, OperationErrorKind, RetryableError};
pub use queue::{QueueError, QueueErrorKind};
pub use quota::{QuotaError, QuotaErrorKind};

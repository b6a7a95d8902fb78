//! # runledger-core
//!
//! Core types, errors, and utilities shared by the runledger crates.
//!
//! This crate provides:
//! - [`CoreError`] - Errors for configuration, I/O and startup plumbing
//! - [`logging`] - Tracing setup and log management utilities
//! - [`recovery`] - Retry policy with exponential backoff and a pluggable sleeper
//! - [`types`] - Run identifiers, run status and the fixed-precision [`UsdCents`] amount
//!
//! ## Example
//!
//! ```no_run
//! use runledger_core::{logging, RetryPolicy};
//!
//! fn main() -> runledger_core::Result<()> {
//!     let _guard = logging::init_logging(None, 0)?;
//!
//!     let policy = RetryPolicy::default();
//!     tracing::info!(max_retries = policy.max_retries, "retry policy ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod recovery;
pub mod types;

// Re-export main types for convenience
pub use error::{CoreError, Result};
pub use logging::{LogGuard, init_logging};
pub use recovery::{RetryOutcome, RetryPolicy, Sleeper, TokioSleeper, retry_async};
pub use types::{CostAmountError, MONEY_SCALE, RunId, RunStatus, UnknownRunStatus, UsdCents};

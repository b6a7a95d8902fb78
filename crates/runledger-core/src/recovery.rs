//! Retry utilities for runledger.
//!
//! This module provides a transport-independent retry strategy with
//! exponential backoff for handling transient errors.
//!
//! ## Features
//!
//! - **Exponential backoff**: delay before retry `n` is `initial_delay * multiplier^(n-1)`
//! - **Jitter**: optional ±25% randomization to spread out synchronized retries
//! - **Configurable limits**: max retries and a cap on any single delay
//! - **Pluggable clock**: sleeps go through a [`Sleeper`], so tests can record
//!   delays instead of waiting for them
//!
//! ## Example
//!
//! ```no_run
//! use runledger_core::recovery::{retry_async, RetryPolicy, TokioSleeper};
//!
//! # async fn example() {
//! let policy = RetryPolicy::default();
//! let outcome = retry_async(&policy, &TokioSleeper, |_e: &String| true, |attempt| async move {
//!     if attempt < 2 { Err("flaky".to_string()) } else { Ok(42) }
//! })
//! .await;
//! assert_eq!(outcome.result, Ok(42));
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

/// Statuses treated as "overloaded / temporarily unavailable" by default.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Retry behavior with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial one.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (2.0 doubles each time).
    pub multiplier: f64,
    /// Whether to add ±25% jitter to each delay.
    pub jitter: bool,
    /// Upstream statuses that are worth another attempt.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy for quick local retries (database busy/locked).
    pub fn for_database() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: false,
            retryable_statuses: Vec::new(),
        }
    }

    /// Total number of attempts this policy allows (initial + retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether an upstream status code is in the retryable set.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Delay to wait before retry number `retry` (1-based).
    ///
    /// Without jitter this is exactly `initial_delay * multiplier^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        let capped_delay = if base_delay.is_finite() { base_delay.min(max) } else { max };

        if !self.jitter || capped_delay <= 0.0 {
            return Duration::from_secs_f64(capped_delay);
        }

        let jitter_range = capped_delay * 0.25;
        let mut rng = rand::rng();
        let jitter = rng.random_range(-jitter_range..jitter_range);
        let final_delay = (capped_delay + jitter).max(0.0).min(max);

        Duration::from_secs_f64(final_delay)
    }
}

/// Something that can wait for a duration.
///
/// Production code uses [`TokioSleeper`]; tests substitute a recorder so
/// backoff schedules can be asserted without real waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend the current task for `delay`.
    async fn sleep(&self, delay: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Result of a retried operation with metadata about the attempts.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The final result (success or last error).
    pub result: T,
    /// Number of attempts made.
    pub attempts: u32,
    /// Sum of all backoff delays requested from the sleeper.
    pub total_delay: Duration,
}

/// Retry an async operation with exponential backoff.
///
/// `operation` receives the 1-based attempt number. Errors for which
/// `is_retryable` returns false are returned immediately without consuming
/// the retry budget. When the budget is exhausted the last error is returned.
pub async fn retry_async<T, E, P, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    is_retryable: P,
    mut operation: F,
) -> RetryOutcome<Result<T, E>>
where
    P: Fn(&E) -> bool,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempts = 0;
    let mut total_delay = Duration::ZERO;

    loop {
        attempts += 1;

        match operation(attempts).await {
            Ok(value) => {
                if attempts > 1 {
                    info!(
                        attempts,
                        total_delay_ms = total_delay.as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                    total_delay,
                };
            }
            Err(e) if !is_retryable(&e) => {
                debug!(attempt = attempts, error = %e, "Operation failed with terminal error");
                return RetryOutcome {
                    result: Err(e),
                    attempts,
                    total_delay,
                };
            }
            Err(e) => {
                if attempts > policy.max_retries {
                    warn!(
                        attempts,
                        max_retries = policy.max_retries,
                        error = %e,
                        "Operation failed after all retries"
                    );
                    return RetryOutcome {
                        result: Err(e),
                        attempts,
                        total_delay,
                    };
                }

                let delay = policy.delay_for_retry(attempts);
                debug!(
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying with backoff"
                );

                sleeper.sleep(delay).await;
                total_delay += delay;
            }
        }
    }
}

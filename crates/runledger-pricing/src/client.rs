//! Retrying, deduplicating price resolution.
//!
//! [`PricingClient`] wraps a [`PriceTransport`] with a per-attempt timeout and
//! the shared [`RetryPolicy`]. Batch resolution issues one lookup per
//! distinct name, all in flight at once, and fails fast on the first terminal
//! error.
//!
//! ## Example
//!
//! ```no_run
//! use runledger_pricing::{PricingClient, PricingConfig};
//!
//! # async fn example() -> runledger_pricing::Result<()> {
//! let client = PricingClient::from_config(&PricingConfig::default())?;
//! let prices = client
//!     .resolve_many(&["gpt-4o-input-token", "gpt-4o-output-token"])
//!     .await?;
//! println!("{} prices", prices.len());
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use runledger_core::{RetryPolicy, Sleeper, TokioSleeper, UsdCents, retry_async};
use tracing::{debug, info, warn};

use crate::config::PricingConfig;
use crate::error::{PricingError, Result};
use crate::transport::{HttpPriceTransport, PriceTransport};

/// Source of current unit prices, keyed by the requested cost name.
#[async_trait]
pub trait UnitPriceSource: Send + Sync {
    /// Resolve a unit price for every distinct name in `names`.
    async fn unit_prices(&self, names: &[String]) -> Result<HashMap<String, UsdCents>>;
}

/// Pricing authority client with retries and batch fan-out.
///
/// Cheap to clone; clones share the transport and sleeper.
#[derive(Clone)]
pub struct PricingClient {
    transport: Arc<dyn PriceTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: Arc<RetryPolicy>,
    attempt_timeout: Duration,
}

impl PricingClient {
    /// Create an HTTP-backed client from config.
    pub fn from_config(config: &PricingConfig) -> Result<Self> {
        let transport = HttpPriceTransport::from_config(config)?;
        Ok(Self::new(Arc::new(transport), config.retry_policy(), config.timeout()))
    }

    /// Create a client over any transport.
    pub fn new(transport: Arc<dyn PriceTransport>, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            transport,
            sleeper: Arc::new(TokioSleeper),
            policy: Arc::new(policy),
            attempt_timeout,
        }
    }

    /// Replace the sleeper used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Resolve the unit price of a single cost name.
    ///
    /// Retries transient failures and retryable upstream statuses; a 404
    /// surfaces immediately as [`PricingError::NotFound`].
    pub async fn resolve(&self, name: &str) -> Result<UsdCents> {
        let policy = self.policy.as_ref();
        let outcome = retry_async(
            policy,
            self.sleeper.as_ref(),
            |e: &PricingError| e.is_retryable(policy),
            |attempt| async move {
                debug!(cost_name = name, attempt, "Resolving unit price");
                match tokio::time::timeout(self.attempt_timeout, self.transport.fetch(name)).await {
                    Ok(result) => result,
                    Err(_) => Err(PricingError::Transient(format!(
                        "lookup of {name} timed out after {}ms",
                        self.attempt_timeout.as_millis()
                    ))),
                }
            },
        )
        .await;

        match outcome.result {
            Ok(quote) => Ok(quote.unit_cost),
            Err(e) => {
                if !e.is_not_found() {
                    warn!(cost_name = name, attempts = outcome.attempts, error = %e, "Unit price lookup failed");
                }
                Err(e)
            }
        }
    }

    /// Resolve unit prices for a batch of names.
    ///
    /// Duplicates are looked up once. Lookups run concurrently; the first
    /// terminal failure is returned without waiting for the rest, which keep
    /// running detached and have their results discarded.
    pub async fn resolve_many<S: AsRef<str>>(&self, names: &[S]) -> Result<HashMap<String, UsdCents>> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = names
            .iter()
            .map(|name| name.as_ref())
            .filter(|name| seen.insert(*name))
            .map(str::to_string)
            .collect();

        if unique.is_empty() {
            return Ok(HashMap::new());
        }

        let mut pending: FuturesUnordered<_> = unique
            .into_iter()
            .map(|name| {
                let client = self.clone();
                tokio::spawn(async move {
                    let price = client.resolve(&name).await;
                    (name, price)
                })
            })
            .collect();

        let mut prices = HashMap::with_capacity(pending.len());
        while let Some(joined) = pending.next().await {
            let (name, price) =
                joined.map_err(|e| PricingError::Internal(format!("price lookup task failed: {e}")))?;
            // returning here drops the remaining JoinHandles, detaching their tasks
            prices.insert(name, price?);
        }

        info!(requested = names.len(), resolved = prices.len(), "Resolved unit prices");
        Ok(prices)
    }
}

#[async_trait]
impl UnitPriceSource for PricingClient {
    async fn unit_prices(&self, names: &[String]) -> Result<HashMap<String, UsdCents>> {
        self.resolve_many(names).await
    }
}

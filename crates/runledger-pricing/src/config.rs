//! Configuration for the pricing client.

use std::time::Duration;

use runledger_core::RetryPolicy;
use runledger_core::recovery::DEFAULT_RETRYABLE_STATUSES;
use serde::{Deserialize, Serialize};

/// Default pricing authority base URL.
pub const DEFAULT_PRICING_URL: &str = "https://costs.mcpfactory.org";

/// Pricing client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Base URL of the pricing authority
    pub base_url: String,

    /// Value sent as `X-API-Key`, if the authority requires one
    pub api_key: Option<String>,

    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,

    /// Retries after the initial attempt
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,

    /// Cap on any single backoff delay, in milliseconds
    pub max_delay_ms: u64,

    /// Randomize backoff delays by ±25%
    pub jitter: bool,

    /// Upstream statuses that are retried
    pub retryable_statuses: Vec<u16>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PRICING_URL.to_string(),
            api_key: None,
            timeout_secs: 10,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: false,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl PricingConfig {
    /// Set custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the API key sent to the pricing authority.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy described by this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: 2.0,
            jitter: self.jitter,
            retryable_statuses: self.retryable_statuses.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matches_contract() {
        let policy = PricingConfig::default().retry_policy();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(2));
        assert!(policy.is_retryable_status(502));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: PricingConfig =
            serde_json::from_str(r#"{"base_url": "http://localhost:9000", "max_retries": 1}"#).unwrap();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.api_key, None);
    }
}

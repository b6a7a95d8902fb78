//! Error types for the pricing client.

use runledger_core::RetryPolicy;
use thiserror::Error;

/// Pricing client errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// The pricing authority has no such cost name (never retried)
    #[error("cost not found: {0}")]
    NotFound(String),

    /// The pricing authority answered with a non-success status other than 404
    #[error("pricing service returned status {status}")]
    Upstream {
        /// HTTP status code
        status: u16,
    },

    /// Connection failure or per-attempt timeout
    #[error("pricing service unreachable: {0}")]
    Transient(String),

    /// A success response whose body is not a usable price
    #[error("invalid pricing response: {0}")]
    InvalidResponse(String),

    /// Client misconfiguration or a crashed resolution task
    #[error("pricing client error: {0}")]
    Internal(String),
}

impl PricingError {
    /// Whether another attempt may succeed under `policy`.
    ///
    /// Transient failures are always retryable; upstream statuses only when
    /// they are in the policy's retryable set.
    pub fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        match self {
            PricingError::Transient(_) => true,
            PricingError::Upstream { status } => policy.is_retryable_status(*status),
            _ => false,
        }
    }

    /// True when the cost name is unknown to the pricing authority.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PricingError::NotFound(_))
    }

    /// Classify a non-success HTTP status for the given cost name.
    pub fn from_http_status(status: u16, name: &str) -> Self {
        match status {
            404 => PricingError::NotFound(name.to_string()),
            _ => PricingError::Upstream { status },
        }
    }

    /// Classify a transport-level reqwest error.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_decode() {
            PricingError::InvalidResponse(error.to_string())
        } else if error.is_builder() {
            PricingError::Internal(error.to_string())
        } else {
            // connect, timeout, request and body errors are all network-level
            PricingError::Transient(error.to_string())
        }
    }
}

/// Result type for pricing operations.
pub type Result<T> = std::result::Result<T, PricingError>;

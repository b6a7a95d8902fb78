//! # runledger-pricing
//!
//! Client for the external pricing authority that quotes the current unit
//! price of a named cost.
//!
//! - [`PricingClient`] - Retrying, deduplicating, concurrent price resolution
//! - [`PriceTransport`] - One request to the authority; [`HttpPriceTransport`]
//!   is the reqwest implementation
//! - [`UnitPriceSource`] - The seam the cost writer depends on
//! - [`PricingConfig`] - Base URL, API key, timeout and backoff settings

pub mod client;
pub mod config;
pub mod error;
pub mod transport;

pub use client::{PricingClient, UnitPriceSource};
pub use config::{DEFAULT_PRICING_URL, PricingConfig};
pub use error::{PricingError, Result};
pub use transport::{HttpPriceTransport, PriceQuote, PriceTransport};

//! Single-attempt price lookups against the pricing authority.
//!
//! A [`PriceTransport`] performs exactly one request and classifies the
//! outcome. Retries, timeouts and fan-out live in [`crate::client`].

use async_trait::async_trait;
use runledger_core::UsdCents;
use serde::Deserialize;
use tracing::debug;

use crate::config::PricingConfig;
use crate::error::{PricingError, Result};

/// A unit price quoted by the pricing authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    /// Cost name as echoed by the authority
    pub name: String,
    /// Price of one unit in US cents
    pub unit_cost: UsdCents,
}

/// One request to the pricing authority.
#[async_trait]
pub trait PriceTransport: Send + Sync {
    /// Fetch the current unit price for `name`.
    async fn fetch(&self, name: &str) -> Result<PriceQuote>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CostResponse {
    name: Option<String>,
    cost_per_unit_in_usd_cents: serde_json::Value,
}

impl CostResponse {
    fn into_quote(self, requested: &str) -> Result<PriceQuote> {
        let unit_cost = match &self.cost_per_unit_in_usd_cents {
            serde_json::Value::String(s) => s.parse::<UsdCents>(),
            serde_json::Value::Number(n) => n.to_string().parse::<UsdCents>(),
            other => {
                return Err(PricingError::InvalidResponse(format!(
                    "costPerUnitInUsdCents for {requested} is not a decimal: {other}"
                )));
            }
        }
        .map_err(|e| PricingError::InvalidResponse(e.to_string()))?;

        Ok(PriceQuote {
            name: self.name.unwrap_or_else(|| requested.to_string()),
            unit_cost,
        })
    }
}

/// HTTP transport backed by reqwest.
///
/// Issues `GET {base_url}/v1/costs/{name}` with the name percent-encoded.
pub struct HttpPriceTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPriceTransport {
    /// Create a transport from config.
    pub fn from_config(config: &PricingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| PricingError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn cost_url(&self, name: &str) -> String {
        format!("{}/v1/costs/{}", self.base_url, urlencoding::encode(name))
    }
}

#[async_trait]
impl PriceTransport for HttpPriceTransport {
    async fn fetch(&self, name: &str) -> Result<PriceQuote> {
        let url = self.cost_url(name);
        debug!(%url, "Fetching unit cost");

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(|e| PricingError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PricingError::from_http_status(status.as_u16(), name));
        }

        let body: CostResponse = response.json().await.map_err(|e| PricingError::from_reqwest(&e))?;
        body.into_quote(name)
    }
}

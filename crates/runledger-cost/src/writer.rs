//! Recording priced cost line items against a run.

use std::sync::Arc;

use runledger_core::{RunId, log_cost_event};
use runledger_pricing::UnitPriceSource;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::db::{RunDatabase, run_blocking};
use crate::error::{LedgerError, Result};
use crate::models::{CostItem, NewRunCost, RunCost, normalize_quantity};

/// Prices cost items and appends them to a run atomically.
#[derive(Clone)]
pub struct RunCostWriter {
    db: Arc<RunDatabase>,
    prices: Arc<dyn UnitPriceSource>,
}

impl RunCostWriter {
    pub fn new(db: Arc<RunDatabase>, prices: Arc<dyn UnitPriceSource>) -> Self {
        Self { db, prices }
    }

    /// Price `items` and append them to `run_id`.
    ///
    /// The run is checked before any pricing request goes out. All items are
    /// priced before anything is written, and the rows go in as a single
    /// transaction, so a failure leaves the run's line items untouched.
    pub async fn record_costs(&self, run_id: RunId, items: &[CostItem]) -> Result<Vec<RunCost>> {
        let quantities = validate_items(items)?;

        if !run_blocking(&self.db, move |db| db.run_exists(run_id)).await? {
            return Err(LedgerError::RunNotFound(run_id));
        }

        let names: Vec<String> = items.iter().map(|item| item.cost_name.clone()).collect();
        let prices = self.prices.unit_prices(&names).await.map_err(|e| {
            warn!(run_id = %run_id, error = %e, "Pricing failed, nothing recorded");
            LedgerError::from_pricing(e)
        })?;

        let mut rows = Vec::with_capacity(items.len());
        for (item, quantity) in items.iter().zip(quantities) {
            let unit_cost = prices.get(&item.cost_name).copied().ok_or_else(|| {
                LedgerError::Internal(format!("no price resolved for {}", item.cost_name))
            })?;
            let total_cost = unit_cost.checked_extend(quantity).ok_or_else(|| {
                LedgerError::InvalidInput(format!("cost total for {} is out of range", item.cost_name))
            })?;
            debug!(run_id = %run_id, cost_name = %item.cost_name, %quantity, %unit_cost, %total_cost, "Priced item");
            rows.push(NewRunCost {
                cost_name: item.cost_name.clone(),
                quantity,
                unit_cost,
                total_cost,
            });
        }

        let inserted = run_blocking(&self.db, move |db| db.insert_costs(run_id, &rows)).await?;

        log_cost_event!(run_id = %run_id, items = inserted.len(), "Recorded run costs");
        Ok(inserted)
    }
}

/// Check the item list and return each quantity at storage precision.
///
/// Totals are extended from these rounded quantities, so a stored row always
/// satisfies `quantity x unit_cost = total_cost`.
fn validate_items(items: &[CostItem]) -> Result<Vec<Decimal>> {
    if items.is_empty() {
        return Err(LedgerError::InvalidInput("items array is required".to_string()));
    }

    items
        .iter()
        .map(|item| {
            if item.cost_name.trim().is_empty() {
                return Err(LedgerError::InvalidInput("costName is required".to_string()));
            }
            if item.quantity <= Decimal::ZERO {
                return Err(LedgerError::InvalidInput(format!(
                    "quantity for {} must be positive",
                    item.cost_name
                )));
            }
            let quantity = normalize_quantity(item.quantity);
            if quantity.is_zero() {
                return Err(LedgerError::InvalidInput(format!(
                    "quantity for {} is below 0.000001",
                    item.cost_name
                )));
            }
            Ok(quantity)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewRun;
    use async_trait::async_trait;
    use runledger_core::UsdCents;
    use runledger_pricing::PricingError;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Mutex;

    /// Fixed price list that records every batch it is asked for.
    #[derive(Default)]
    struct FixedPrices {
        prices: HashMap<String, UsdCents>,
        failure: Option<PricingError>,
        requests: Mutex<Vec<Vec<String>>>,
    }

    impl FixedPrices {
        fn with(mut self, name: &str, price: &str) -> Self {
            self.prices.insert(name.to_string(), price.parse().unwrap());
            self
        }
    }

    #[async_trait]
    impl UnitPriceSource for FixedPrices {
        async fn unit_prices(&self, names: &[String]) -> runledger_pricing::Result<HashMap<String, UsdCents>> {
            self.requests.lock().unwrap().push(names.to_vec());
            if let Some(err) = &self.failure {
                return Err(err.clone());
            }
            names
                .iter()
                .map(|n| {
                    self.prices
                        .get(n)
                        .map(|p| (n.clone(), *p))
                        .ok_or_else(|| PricingError::NotFound(n.clone()))
                })
                .collect()
        }
    }

    fn setup(prices: FixedPrices) -> (Arc<RunDatabase>, Arc<FixedPrices>, RunCostWriter, RunId) {
        let db = Arc::new(RunDatabase::open_in_memory().unwrap());
        let (org, _) = db.upsert_organization("acme").unwrap();
        let run = db.create_run(&NewRun::new(org.id, "s", "t")).unwrap();
        let prices = Arc::new(prices);
        let writer = RunCostWriter::new(db.clone(), prices.clone());
        (db, prices, writer, run.id)
    }

    fn item(name: &str, quantity: &str) -> CostItem {
        CostItem::new(name, Decimal::from_str(quantity).unwrap())
    }

    #[tokio::test]
    async fn test_records_extended_totals() {
        let (db, _, writer, run_id) = setup(
            FixedPrices::default()
                .with("gpt-4o-input-token", "0.00025")
                .with("search-call", "1.5"),
        );

        let rows = writer
            .record_costs(run_id, &[item("gpt-4o-input-token", "1200"), item("search-call", "3")])
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].total_cost.to_string(), "0.3000000000");
        assert_eq!(rows[1].total_cost.to_string(), "4.5000000000");
        assert_eq!(db.costs_for_run(run_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_cost_writes_nothing() {
        let (db, _, writer, run_id) = setup(FixedPrices::default().with("known", "1"));

        let err = writer
            .record_costs(run_id, &[item("known", "1"), item("mystery", "1")])
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::UnknownCost(ref n) if n == "mystery"));
        assert!(db.costs_for_run(run_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_run_checked_before_pricing() {
        let (_, prices, writer, _) = setup(FixedPrices::default().with("a", "1"));
        let ghost = RunId::new();

        let err = writer.record_costs(ghost, &[item("a", "1")]).await.unwrap_err();

        assert!(matches!(err, LedgerError::RunNotFound(id) if id == ghost));
        assert!(prices.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pricing_outage_is_upstream_unavailable() {
        let prices = FixedPrices {
            failure: Some(PricingError::Upstream { status: 503 }),
            ..Default::default()
        };
        let (db, _, writer, run_id) = setup(prices);

        let err = writer.record_costs(run_id, &[item("a", "1")]).await.unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::UpstreamUnavailable);
        assert!(db.costs_for_run(run_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_and_non_positive_items() {
        let (_, prices, writer, run_id) = setup(FixedPrices::default().with("a", "1"));

        let err = writer.record_costs(run_id, &[]).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        let err = writer.record_costs(run_id, &[item("a", "0")]).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        let err = writer.record_costs(run_id, &[item("a", "-2")]).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        let err = writer.record_costs(run_id, &[item("a", "0.0000001")]).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        assert!(prices.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rounds_total_half_away_from_zero() {
        let (_, _, writer, run_id) = setup(FixedPrices::default().with("a", "0.0000000005"));

        let rows = writer.record_costs(run_id, &[item("a", "0.5")]).await.unwrap();

        assert_eq!(rows[0].quantity.to_string(), "0.500000");
        assert_eq!(rows[0].total_cost.to_string(), "0.0000000003");
    }

    #[tokio::test]
    async fn test_total_uses_stored_quantity() {
        let (db, _, writer, run_id) = setup(FixedPrices::default().with("a", "1"));

        let rows = writer.record_costs(run_id, &[item("a", "2.0000004")]).await.unwrap();

        assert_eq!(rows[0].quantity.to_string(), "2.000000");
        assert_eq!(rows[0].total_cost.to_string(), "2.0000000000");
        let stored = db.costs_for_run(run_id).unwrap();
        assert_eq!(stored[0].total_cost, rows[0].total_cost);
    }
}

//! Shared handler state.

use std::sync::Arc;

use runledger_cost::{CostRollup, RunCostWriter, RunDatabase};
use runledger_pricing::UnitPriceSource;

/// State cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<RunDatabase>,
    pub writer: RunCostWriter,
    pub rollup: CostRollup,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(db: Arc<RunDatabase>, prices: Arc<dyn UnitPriceSource>, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            writer: RunCostWriter::new(db.clone(), prices),
            rollup: CostRollup::new(db.clone()),
            db,
            api_key: api_key.into(),
        }
    }
}

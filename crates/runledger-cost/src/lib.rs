//! # runledger-cost
//!
//! Run storage and hierarchical cost accounting.
//!
//! This crate provides:
//! - [`RunDatabase`] - SQLite storage for organizations, users, runs and cost line items
//! - [`CostRollup`] - Own, descendant and total cost of a run over an unbounded-depth tree
//! - [`RunCostWriter`] - Prices cost items and appends them to a run atomically
//! - [`RunQuery`] - Run listings and grouped cost summaries
//!
//! ## Example
//!
//! ```no_run
//! use runledger_cost::{NewRun, RunDatabase, rollup};
//!
//! fn main() -> anyhow::Result<()> {
//!     let db = RunDatabase::open("runledger.db")?;
//!     let (org, _) = db.upsert_organization("acme")?;
//!
//!     let parent = db.create_run(&NewRun::new(org.id, "search-service", "enrich-lead"))?;
//!     db.create_run(&NewRun::new(org.id, "llm-service", "summarize").with_parent(parent.id))?;
//!
//!     let report = rollup::build_report(&db, parent.id)?;
//!     println!("total: {}", report.total_cost);
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod rollup;
pub mod writer;

// Re-export main types
pub use db::{RunDatabase, run_blocking};
pub use error::{ErrorKind, LedgerError, Result};
pub use models::{
    CostItem, CostReport, DescendantCost, GroupBy, NewRun, NewRunCost, Organization, Run, RunCost, RunFilter,
    SummaryEntry, User,
};
pub use query::{Page, RunQuery};
pub use rollup::CostRollup;
pub use writer::RunCostWriter;

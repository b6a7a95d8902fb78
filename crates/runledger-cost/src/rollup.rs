//! Hierarchical cost rollup.
//!
//! A report covers the run itself plus every transitive descendant. The
//! subtree is discovered breadth-first as an iterative closure: the frontier
//! starts at the run, and each round fetches the children of the whole
//! frontier in one batched query, keeping only ids not seen before. The walk
//! ends when a round adds nothing, so depth is bounded only by the data.

use std::collections::HashSet;
use std::sync::Arc;

use runledger_core::{RunId, UsdCents};
use tracing::{debug, instrument};

use crate::db::{RunDatabase, run_blocking};
use crate::error::{LedgerError, Result};
use crate::models::{CostReport, DescendantCost, Run};

/// Computes cost reports over the run tree.
#[derive(Clone)]
pub struct CostRollup {
    db: Arc<RunDatabase>,
}

impl CostRollup {
    pub fn new(db: Arc<RunDatabase>) -> Self {
        Self { db }
    }

    /// Cost report for `run_id`, computed on the blocking pool.
    pub async fn report(&self, run_id: RunId) -> Result<CostReport> {
        run_blocking(&self.db, move |db| build_report(db, run_id)).await
    }
}

/// Every transitive descendant of `root` with its depth below `root`.
///
/// Children come before grandchildren; each run appears once even if the
/// stored data were to contain a cycle.
pub fn descendants(db: &RunDatabase, root: RunId) -> Result<Vec<(Run, u32)>> {
    let mut seen: HashSet<RunId> = HashSet::from([root]);
    let mut frontier = vec![root];
    let mut found = Vec::new();
    let mut depth = 0u32;

    while !frontier.is_empty() {
        depth += 1;
        let children = db.children_of(&frontier)?;
        frontier = Vec::with_capacity(children.len());

        for child in children {
            if seen.insert(child.id) {
                frontier.push(child.id);
                found.push((child, depth));
            }
        }
    }

    Ok(found)
}

/// Build the cost report of one run.
#[instrument(level = "debug", skip_all, fields(run_id = %run_id))]
pub fn build_report(db: &RunDatabase, run_id: RunId) -> Result<CostReport> {
    let run = db.get_run(run_id)?.ok_or(LedgerError::RunNotFound(run_id))?;

    let costs = db.costs_for_run(run_id)?;
    let own_cost = sum_amounts(costs.iter().map(|c| c.total_cost))?;

    let subtree = descendants(db, run_id)?;
    let ids: Vec<RunId> = subtree.iter().map(|(r, _)| r.id).collect();
    let totals = db.cost_totals_by_run(&ids)?;

    let mut descendant_costs = Vec::with_capacity(subtree.len());
    for (child, depth) in subtree {
        let own = totals.get(&child.id).copied().unwrap_or(UsdCents::ZERO);
        let parent_run_id = child
            .parent_run_id
            .ok_or_else(|| LedgerError::Internal(format!("descendant {} has no parent", child.id)))?;
        descendant_costs.push(DescendantCost {
            id: child.id,
            parent_run_id,
            depth,
            service_name: child.service_name,
            task_name: child.task_name,
            status: child.status,
            own_cost: own,
        });
    }

    let children_cost = sum_amounts(descendant_costs.iter().map(|d| d.own_cost))?;
    let total_cost = own_cost
        .checked_add(children_cost)
        .ok_or_else(|| LedgerError::Internal("cost total overflow".to_string()))?;

    debug!(
        descendants = descendant_costs.len(),
        own = %own_cost,
        children = %children_cost,
        "Built cost report"
    );

    Ok(CostReport {
        run,
        costs,
        own_cost,
        children_cost,
        total_cost,
        descendants: descendant_costs,
    })
}

fn sum_amounts(mut amounts: impl Iterator<Item = UsdCents>) -> Result<UsdCents> {
    amounts.try_fold(UsdCents::ZERO, |acc, amount| {
        acc.checked_add(amount)
            .ok_or_else(|| LedgerError::Internal("cost total overflow".to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRun, NewRunCost};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn priced(name: &str, unit: &str) -> NewRunCost {
        let unit_cost: UsdCents = unit.parse().unwrap();
        NewRunCost {
            cost_name: name.to_string(),
            quantity: Decimal::ONE,
            unit_cost,
            total_cost: unit_cost,
        }
    }

    fn seeded() -> (RunDatabase, Uuid) {
        let db = RunDatabase::open_in_memory().unwrap();
        let (org, _) = db.upsert_organization("acme").unwrap();
        (db, org.id)
    }

    #[test]
    fn test_unknown_run_is_not_found() {
        let (db, _) = seeded();
        let missing = RunId::new();
        assert!(matches!(build_report(&db, missing), Err(LedgerError::RunNotFound(id)) if id == missing));
    }

    #[test]
    fn test_leaf_without_costs_reports_zero() {
        let (db, org_id) = seeded();
        let run = db.create_run(&NewRun::new(org_id, "s", "t")).unwrap();

        let report = build_report(&db, run.id).unwrap();
        assert_eq!(report.own_cost.to_string(), "0.0000000000");
        assert_eq!(report.children_cost.to_string(), "0.0000000000");
        assert_eq!(report.total_cost.to_string(), "0.0000000000");
        assert!(report.descendants.is_empty());
        assert!(report.costs.is_empty());
    }

    #[test]
    fn test_chain_rolls_up_to_root() {
        let (db, org_id) = seeded();
        let a = db.create_run(&NewRun::new(org_id, "s", "a")).unwrap();
        let b = db.create_run(&NewRun::new(org_id, "s", "b").with_parent(a.id)).unwrap();
        let c = db.create_run(&NewRun::new(org_id, "s", "c").with_parent(b.id)).unwrap();
        db.insert_costs(c.id, &[priced("x", "0.10")]).unwrap();

        let report = build_report(&db, a.id).unwrap();
        assert_eq!(report.own_cost.to_string(), "0.0000000000");
        assert_eq!(report.children_cost.to_string(), "0.1000000000");
        assert_eq!(report.total_cost.to_string(), "0.1000000000");
        assert_eq!(report.descendants.len(), 2);

        let c_entry = report.descendants.iter().find(|d| d.id == c.id).unwrap();
        assert_eq!(c_entry.parent_run_id, b.id);
        assert_eq!(c_entry.depth, 2);
        assert_eq!(c_entry.own_cost.to_string(), "0.1000000000");

        let b_entry = report.descendants.iter().find(|d| d.id == b.id).unwrap();
        assert_eq!(b_entry.depth, 1);
        assert_eq!(b_entry.own_cost, UsdCents::ZERO);
    }

    #[test]
    fn test_own_cost_strategies_agree() {
        let (db, org_id) = seeded();
        let priced_run = db.create_run(&NewRun::new(org_id, "s", "t")).unwrap();
        let empty_run = db.create_run(&NewRun::new(org_id, "s", "t")).unwrap();
        db.insert_costs(priced_run.id, &[priced("x", "0.3333333333"), priced("y", "0.0000000001")])
            .unwrap();

        let totals = db.cost_totals_by_run(&[priced_run.id, empty_run.id]).unwrap();
        for run_id in [priced_run.id, empty_run.id] {
            let fetched = build_report(&db, run_id).unwrap().own_cost;
            assert_eq!(fetched, totals[&run_id]);
            assert_eq!(fetched.to_string(), totals[&run_id].to_string());
        }
        assert_eq!(totals[&empty_run.id].to_string(), "0.0000000000");
    }

    #[test]
    fn test_descendants_listed_breadth_first() {
        let (db, org_id) = seeded();
        let root = db.create_run(&NewRun::new(org_id, "s", "root")).unwrap();
        let left = db.create_run(&NewRun::new(org_id, "s", "l").with_parent(root.id)).unwrap();
        let right = db.create_run(&NewRun::new(org_id, "s", "r").with_parent(root.id)).unwrap();
        let deep = db.create_run(&NewRun::new(org_id, "s", "ld").with_parent(left.id)).unwrap();

        let found = descendants(&db, root.id).unwrap();
        let depths: Vec<u32> = found.iter().map(|(_, d)| *d).collect();
        assert_eq!(depths, vec![1, 1, 2]);
        assert_eq!(found[2].0.id, deep.id);
        assert!(found[..2].iter().any(|(r, _)| r.id == right.id));
    }
}

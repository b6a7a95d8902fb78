//! Query functions for listing runs and summarizing their costs.

use std::collections::{BTreeMap, HashSet};

use rusqlite::params_from_iter;
use runledger_core::UsdCents;
use rust_decimal::Decimal;

use crate::db::{RUN_COLUMNS, RunDatabase, format_ts, parse_col, run_from_row};
use crate::error::{LedgerError, Result};
use crate::models::{GroupBy, Run, RunFilter, SummaryEntry};

/// Page size used when none is requested.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Limit and offset for a run listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    /// Clamp requested values: a missing or zero limit becomes the default,
    /// anything above the maximum is capped.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        let limit = match limit {
            None | Some(0) => DEFAULT_PAGE_LIMIT,
            Some(l) => l.min(MAX_PAGE_LIMIT),
        };
        Self {
            limit,
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Query interface for run listings and cost summaries.
pub struct RunQuery<'a> {
    db: &'a RunDatabase,
}

impl<'a> RunQuery<'a> {
    /// Create a new query interface.
    pub fn new(db: &'a RunDatabase) -> Self {
        Self { db }
    }

    /// Runs matching `filter`, newest first.
    pub fn list_runs(&self, filter: &RunFilter, page: Page) -> Result<Vec<Run>> {
        let (where_clause, mut args) = where_clause(filter, "", true);
        args.push(page.limit.to_string());
        args.push(page.offset.to_string());

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE {where_clause}
             ORDER BY started_at DESC, rowid DESC
             LIMIT CAST(? AS INTEGER) OFFSET CAST(? AS INTEGER)"
        ))?;

        let rows = stmt.query_map(params_from_iter(args.iter()), run_from_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Cost totals of the runs matching `filter`, grouped by `group_by`.
    ///
    /// Service and user groupings count every matching run, including runs
    /// without line items, which contribute zero. Cost-name grouping only
    /// sees runs that have line items. Entries are ordered by key.
    pub fn summary(&self, filter: &RunFilter, group_by: GroupBy) -> Result<Vec<SummaryEntry>> {
        match group_by {
            GroupBy::ServiceName => self.summary_by_run_column(filter, "service_name"),
            GroupBy::UserId => self.summary_by_run_column(filter, "user_id"),
            GroupBy::CostName => self.summary_by_cost_name(filter),
        }
    }

    fn summary_by_run_column(&self, filter: &RunFilter, column: &str) -> Result<Vec<SummaryEntry>> {
        // summaries ignore the user and status filters
        let (where_clause, args) = where_clause(filter, "r.", false);

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT r.{column}, r.id, rc.total_cost_in_usd_cents
             FROM runs r LEFT JOIN run_costs rc ON rc.run_id = r.id
             WHERE {where_clause}"
        ))?;

        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let key: Option<String> = row.get(0)?;
            let run_id: String = row.get(1)?;
            let total: Option<String> = row.get(2)?;
            Ok((key, run_id, total))
        })?;

        let mut groups: BTreeMap<Option<String>, (UsdCents, HashSet<String>)> = BTreeMap::new();
        for row in rows {
            let (key, run_id, total) = row?;
            let (sum, runs) = groups.entry(key).or_insert_with(|| (UsdCents::ZERO, HashSet::new()));
            runs.insert(run_id);
            if let Some(total) = total {
                let amount: UsdCents = total
                    .parse()
                    .map_err(|e: runledger_core::CostAmountError| LedgerError::Internal(e.to_string()))?;
                *sum = checked_sum(*sum, amount)?;
            }
        }

        Ok(groups
            .into_iter()
            .map(|(key, (total_cost, runs))| SummaryEntry {
                key,
                total_cost,
                run_count: Some(runs.len() as u64),
                total_quantity: None,
            })
            .collect())
    }

    fn summary_by_cost_name(&self, filter: &RunFilter) -> Result<Vec<SummaryEntry>> {
        let (where_clause, args) = where_clause(filter, "r.", false);

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT rc.cost_name, rc.quantity, rc.total_cost_in_usd_cents
             FROM run_costs rc INNER JOIN runs r ON rc.run_id = r.id
             WHERE {where_clause}"
        ))?;

        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                parse_col::<Decimal>(row, 1)?,
                parse_col::<UsdCents>(row, 2)?,
            ))
        })?;

        let mut groups: BTreeMap<String, (UsdCents, Decimal)> = BTreeMap::new();
        for row in rows {
            let (name, quantity, total) = row?;
            let (sum, qty) = groups.entry(name).or_insert((UsdCents::ZERO, Decimal::ZERO));
            *sum = checked_sum(*sum, total)?;
            *qty = qty
                .checked_add(quantity)
                .ok_or_else(|| LedgerError::Internal("quantity total overflow".to_string()))?;
        }

        Ok(groups
            .into_iter()
            .map(|(key, (total_cost, total_quantity))| SummaryEntry {
                key: Some(key),
                total_cost,
                run_count: None,
                total_quantity: Some(total_quantity),
            })
            .collect())
    }
}

fn checked_sum(a: UsdCents, b: UsdCents) -> Result<UsdCents> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::Internal("cost total overflow".to_string()))
}

/// Build a `WHERE` clause and its positional arguments for `filter`.
///
/// Every bound value is TEXT, matching how the columns are stored.
fn where_clause(filter: &RunFilter, prefix: &str, list_filters: bool) -> (String, Vec<String>) {
    let mut conditions = vec![format!("{prefix}organization_id = ?")];
    let mut args = vec![filter.organization_id.to_string()];

    if let Some(service) = &filter.service_name {
        conditions.push(format!("{prefix}service_name = ?"));
        args.push(service.clone());
    }
    if let Some(task) = &filter.task_name {
        conditions.push(format!("{prefix}task_name = ?"));
        args.push(task.clone());
    }
    if list_filters {
        if let Some(user) = filter.user_id {
            conditions.push(format!("{prefix}user_id = ?"));
            args.push(user.to_string());
        }
        if let Some(status) = filter.status {
            conditions.push(format!("{prefix}status = ?"));
            args.push(status.as_str().to_string());
        }
    }
    if let Some(after) = &filter.started_after {
        conditions.push(format!("{prefix}started_at >= ?"));
        args.push(format_ts(after));
    }
    if let Some(before) = &filter.started_before {
        conditions.push(format!("{prefix}started_at <= ?"));
        args.push(format_ts(before));
    }

    (conditions.join(" AND "), args)
}

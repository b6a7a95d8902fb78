//! SQLite storage for organizations, users, runs and run costs.
//!
//! Decimals are stored as canonical TEXT so no amount ever passes through a
//! float. Timestamps are RFC 3339 TEXT with a fixed microsecond width, which
//! keeps lexicographic and chronological order identical.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use runledger_core::{RetryPolicy, RunId, RunStatus, UsdCents};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, Result, is_database_locked_error, is_foreign_key_violation};
use crate::models::{NewRun, NewRunCost, Organization, Run, RunCost, User, normalize_quantity};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// Maximum ids bound into a single `IN (...)` list.
pub(crate) const IN_CLAUSE_CHUNK: usize = 500;

pub(crate) const RUN_COLUMNS: &str = "id, organization_id, user_id, service_name, task_name, status, \
     parent_run_id, started_at, completed_at, created_at, updated_at";

const COST_COLUMNS: &str =
    "id, run_id, cost_name, quantity, unit_cost_in_usd_cents, total_cost_in_usd_cents, created_at";

/// SQLite database holding the run ledger.
pub struct RunDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl RunDatabase {
    /// Open or create a run database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Get the shared connection handle for ad-hoc queries.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::Internal(format!("failed to acquire lock: {}", e)))
    }

    /// Execute a database operation with automatic retry on lock errors.
    ///
    /// Backoff follows [`RetryPolicy::for_database`]. Callers run on the
    /// blocking pool, so sleeping the thread is fine here.
    fn with_retry<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> Result<T>,
    {
        let policy = RetryPolicy::for_database();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = {
                let mut conn = self.lock()?;
                f(&mut conn)
            };

            match outcome {
                Ok(result) => {
                    if attempt > 1 {
                        info!(attempt, operation, "Database operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(ref e) if is_database_locked_error(e) && attempt <= policy.max_retries => {
                    let delay = policy.delay_for_retry(attempt);
                    warn!(
                        attempt,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        operation,
                        "Database locked, retrying with backoff"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    if attempt > 1 {
                        warn!(attempt, operation, error = %e, "Database operation failed after retries");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Run database migrations.
    fn migrate(&self) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Migration(format!("failed to acquire lock: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 =
            conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))?;

        if current_version < SCHEMA_VERSION {
            info!(current = current_version, target = SCHEMA_VERSION, "Running database migrations");
            let tx = conn.transaction()?;
            if current_version < 1 {
                migration_v1(&tx)?;
            }
            tx.commit()?;
        }

        Ok(())
    }

    /// Cheap liveness probe.
    pub fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    // ============ Organizations and users ============

    /// Create an organization for `external_id`, or return the existing one.
    ///
    /// The flag is true when a new row was created.
    pub fn upsert_organization(&self, external_id: &str) -> Result<(Organization, bool)> {
        self.with_retry("upsert_organization", |conn| {
            let tx = conn.transaction()?;
            let existing = tx
                .query_row(
                    "SELECT id, external_id, created_at, updated_at FROM organizations WHERE external_id = ?1",
                    params![external_id],
                    organization_from_row,
                )
                .optional()?;

            if let Some(org) = existing {
                return Ok((org, false));
            }

            let now = stored_now();
            let org = Organization {
                id: Uuid::new_v4(),
                external_id: external_id.to_string(),
                created_at: now,
                updated_at: now,
            };
            tx.execute(
                "INSERT INTO organizations (id, external_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![org.id.to_string(), org.external_id, format_ts(&now), format_ts(&now)],
            )?;
            tx.commit()?;

            debug!(organization_id = %org.id, external_id, "Created organization");
            Ok((org, true))
        })
    }

    /// Create a user for `external_id` in an existing organization, or return
    /// the existing user.
    pub fn upsert_user(&self, external_id: &str, organization_id: Uuid) -> Result<(User, bool)> {
        self.with_retry("upsert_user", |conn| {
            let tx = conn.transaction()?;
            if !exists(&tx, "organizations", &organization_id.to_string())? {
                return Err(LedgerError::OrganizationNotFound(organization_id));
            }

            let existing = tx
                .query_row(
                    "SELECT id, external_id, organization_id, created_at, updated_at
                     FROM users WHERE external_id = ?1",
                    params![external_id],
                    user_from_row,
                )
                .optional()?;

            if let Some(user) = existing {
                return Ok((user, false));
            }

            let now = stored_now();
            let user = User {
                id: Uuid::new_v4(),
                external_id: external_id.to_string(),
                organization_id,
                created_at: now,
                updated_at: now,
            };
            tx.execute(
                "INSERT INTO users (id, external_id, organization_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.to_string(),
                    user.external_id,
                    organization_id.to_string(),
                    format_ts(&now),
                    format_ts(&now)
                ],
            )?;
            tx.commit()?;

            debug!(user_id = %user.id, external_id, "Created user");
            Ok((user, true))
        })
    }

    // ============ Runs ============

    /// Create a run in `running` status.
    ///
    /// The organization, user and parent run must already exist; nothing is
    /// written otherwise.
    pub fn create_run(&self, new_run: &NewRun) -> Result<Run> {
        self.with_retry("create_run", |conn| {
            let tx = conn.transaction()?;

            if !exists(&tx, "organizations", &new_run.organization_id.to_string())? {
                return Err(LedgerError::OrganizationNotFound(new_run.organization_id));
            }
            if let Some(user_id) = new_run.user_id {
                if !exists(&tx, "users", &user_id.to_string())? {
                    return Err(LedgerError::UserNotFound(user_id));
                }
            }
            if let Some(parent) = new_run.parent_run_id {
                if !exists(&tx, "runs", &parent.to_string())? {
                    warn!(parent_run_id = %parent, "Rejected run with unknown parent");
                    return Err(LedgerError::ParentRunNotFound(parent));
                }
            }

            let now = stored_now();
            let run = Run {
                id: RunId::new(),
                organization_id: new_run.organization_id,
                user_id: new_run.user_id,
                service_name: new_run.service_name.clone(),
                task_name: new_run.task_name.clone(),
                status: RunStatus::Running,
                parent_run_id: new_run.parent_run_id,
                started_at: now,
                completed_at: None,
                created_at: now,
                updated_at: now,
            };

            tx.execute(
                &format!("INSERT INTO runs ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
                params![
                    run.id.to_string(),
                    run.organization_id.to_string(),
                    run.user_id.map(|u| u.to_string()),
                    run.service_name,
                    run.task_name,
                    run.status.as_str(),
                    run.parent_run_id.map(|p| p.to_string()),
                    format_ts(&now),
                    Option::<String>::None,
                    format_ts(&now),
                    format_ts(&now)
                ],
            )
            .map_err(|e| match run.parent_run_id {
                Some(parent) if is_foreign_key_violation(&e) => LedgerError::ParentRunNotFound(parent),
                _ => LedgerError::Database(e),
            })?;
            tx.commit()?;

            debug!(run_id = %run.id, parent_run_id = ?run.parent_run_id, "Created run");
            Ok(run)
        })
    }

    /// Fetch a run by id.
    pub fn get_run(&self, id: RunId) -> Result<Option<Run>> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id.to_string()],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// Whether a run exists.
    pub fn run_exists(&self, id: RunId) -> Result<bool> {
        let conn = self.lock()?;
        exists(&conn, "runs", &id.to_string())
    }

    /// Move a running run to a terminal status, stamping `completed_at`.
    pub fn finish_run(&self, id: RunId, status: RunStatus) -> Result<Run> {
        if !status.is_terminal() {
            return Err(LedgerError::InvalidInput(
                "status must be 'completed' or 'failed'".to_string(),
            ));
        }

        self.with_retry("finish_run", |conn| {
            let tx = conn.transaction()?;
            let now = format_ts(&stored_now());
            let changed = tx.execute(
                "UPDATE runs SET status = ?1, completed_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND status = 'running'",
                params![status.as_str(), now, id.to_string()],
            )?;

            if changed == 0 {
                let current: Option<String> = tx
                    .query_row("SELECT status FROM runs WHERE id = ?1", params![id.to_string()], |row| {
                        row.get(0)
                    })
                    .optional()?;
                return match current {
                    None => Err(LedgerError::RunNotFound(id)),
                    Some(current) => Err(LedgerError::InvalidTransition {
                        run_id: id,
                        from: current
                            .parse()
                            .map_err(|e: runledger_core::UnknownRunStatus| LedgerError::Internal(e.to_string()))?,
                        to: status,
                    }),
                };
            }

            let run = tx.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id.to_string()],
                run_from_row,
            )?;
            tx.commit()?;

            debug!(run_id = %id, status = %status, "Finished run");
            Ok(run)
        })
    }

    /// Direct children of any run in `parents`, in one batched query per chunk.
    pub fn children_of(&self, parents: &[RunId]) -> Result<Vec<Run>> {
        let conn = self.lock()?;
        let mut children = Vec::new();

        for chunk in parents.chunks(IN_CLAUSE_CHUNK) {
            let sql = format!(
                "SELECT {RUN_COLUMNS} FROM runs WHERE parent_run_id IN ({}) ORDER BY started_at, id",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(|id| id.to_string())), run_from_row)?;
            for row in rows {
                children.push(row?);
            }
        }

        Ok(children)
    }

    // ============ Costs ============

    /// Cost line items of one run, oldest first.
    pub fn costs_for_run(&self, run_id: RunId) -> Result<Vec<RunCost>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COST_COLUMNS} FROM run_costs WHERE run_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![run_id.to_string()], cost_from_row)?;

        let mut costs = Vec::new();
        for row in rows {
            costs.push(row?);
        }
        Ok(costs)
    }

    /// Sum of line item totals per run, grouped in the store.
    ///
    /// Every requested id is present in the result; runs without line items
    /// map to zero.
    pub fn cost_totals_by_run(&self, run_ids: &[RunId]) -> Result<HashMap<RunId, UsdCents>> {
        let conn = self.lock()?;
        let mut totals: HashMap<RunId, UsdCents> = run_ids.iter().map(|id| (*id, UsdCents::ZERO)).collect();

        for chunk in run_ids.chunks(IN_CLAUSE_CHUNK) {
            let sql = format!(
                "SELECT run_id, total_cost_in_usd_cents FROM run_costs WHERE run_id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(|id| id.to_string())), |row| {
                Ok((parse_col::<RunId>(row, 0)?, parse_col::<UsdCents>(row, 1)?))
            })?;

            for row in rows {
                let (run_id, amount) = row?;
                let entry = totals.entry(run_id).or_insert(UsdCents::ZERO);
                *entry = entry
                    .checked_add(amount)
                    .ok_or_else(|| LedgerError::Internal(format!("cost total overflow for run {run_id}")))?;
            }
        }

        Ok(totals)
    }

    /// Append priced line items to a run in a single transaction.
    ///
    /// Either every row is written or none is.
    pub fn insert_costs(&self, run_id: RunId, items: &[NewRunCost]) -> Result<Vec<RunCost>> {
        self.with_retry("insert_costs", |conn| {
            let tx = conn.transaction()?;
            let now = stored_now();
            let mut inserted = Vec::with_capacity(items.len());

            {
                let mut stmt = tx.prepare_cached(&format!(
                    "INSERT INTO run_costs ({COST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ))?;

                for item in items {
                    let cost = RunCost {
                        id: Uuid::new_v4(),
                        run_id,
                        cost_name: item.cost_name.clone(),
                        quantity: normalize_quantity(item.quantity),
                        unit_cost: item.unit_cost,
                        total_cost: item.total_cost,
                        created_at: now,
                    };

                    stmt.execute(params![
                        cost.id.to_string(),
                        run_id.to_string(),
                        cost.cost_name,
                        cost.quantity.to_string(),
                        cost.unit_cost.to_fixed(),
                        cost.total_cost.to_fixed(),
                        format_ts(&now)
                    ])
                    .map_err(|e| {
                        if is_foreign_key_violation(&e) {
                            LedgerError::RunNotFound(run_id)
                        } else {
                            LedgerError::Database(e)
                        }
                    })?;

                    inserted.push(cost);
                }
            }

            tx.commit()?;
            debug!(run_id = %run_id, count = inserted.len(), "Inserted run costs");
            Ok(inserted)
        })
    }
}

/// Migration to version 1: initial schema.
fn migration_v1(tx: &Transaction) -> Result<()> {
    debug!("Running migration v1: initial schema");

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            user_id TEXT REFERENCES users(id),
            service_name TEXT NOT NULL,
            task_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running'
                CHECK (status IN ('running', 'completed', 'failed')),
            parent_run_id TEXT REFERENCES runs(id),
            started_at TEXT NOT NULL,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_runs_org ON runs(organization_id);
        CREATE INDEX IF NOT EXISTS idx_runs_org_service ON runs(organization_id, service_name);
        CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
        CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
        CREATE INDEX IF NOT EXISTS idx_runs_parent ON runs(parent_run_id);

        CREATE TABLE IF NOT EXISTS run_costs (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            cost_name TEXT NOT NULL,
            quantity TEXT NOT NULL,
            unit_cost_in_usd_cents TEXT NOT NULL,
            total_cost_in_usd_cents TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_run_costs_run ON run_costs(run_id);
        CREATE INDEX IF NOT EXISTS idx_run_costs_name ON run_costs(cost_name);

        INSERT INTO schema_version (version) VALUES (1);",
    )?;

    info!("Migration v1 completed");
    Ok(())
}

/// Current time at stored precision, so returned models equal reloaded ones.
pub(crate) fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Render a timestamp in the stored form.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `?, ?, ...` with `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Parse a TEXT column through `FromStr`, reporting failures as conversion errors.
pub(crate) fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool> {
    let found = conn
        .query_row(&format!("SELECT 1 FROM {table} WHERE id = ?1"), params![id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        id: parse_col(row, 0)?,
        organization_id: parse_col(row, 1)?,
        user_id: parse_opt_col(row, 2)?,
        service_name: row.get(3)?,
        task_name: row.get(4)?,
        status: parse_col(row, 5)?,
        parent_run_id: parse_opt_col(row, 6)?,
        started_at: parse_col(row, 7)?,
        completed_at: parse_opt_col(row, 8)?,
        created_at: parse_col(row, 9)?,
        updated_at: parse_col(row, 10)?,
    })
}

fn cost_from_row(row: &Row<'_>) -> rusqlite::Result<RunCost> {
    Ok(RunCost {
        id: parse_col(row, 0)?,
        run_id: parse_col(row, 1)?,
        cost_name: row.get(2)?,
        quantity: parse_col(row, 3)?,
        unit_cost: parse_col(row, 4)?,
        total_cost: parse_col(row, 5)?,
        created_at: parse_col(row, 6)?,
    })
}

fn organization_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: parse_col(row, 0)?,
        external_id: row.get(1)?,
        created_at: parse_col(row, 2)?,
        updated_at: parse_col(row, 3)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_col(row, 0)?,
        external_id: row.get(1)?,
        organization_id: parse_col(row, 2)?,
        created_at: parse_col(row, 3)?,
        updated_at: parse_col(row, 4)?,
    })
}

/// Run a store operation on the blocking pool.
///
/// Request tasks suspend here instead of holding a runtime worker while
/// SQLite does I/O.
pub async fn run_blocking<T, F>(db: &Arc<RunDatabase>, f: F) -> Result<T>
where
    F: FnOnce(&RunDatabase) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| LedgerError::Internal(format!("blocking store task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn db_with_org() -> (RunDatabase, Uuid) {
        let db = RunDatabase::open_in_memory().unwrap();
        let (org, _) = db.upsert_organization("org-ext").unwrap();
        (db, org.id)
    }

    fn priced(name: &str, quantity: i64, unit: &str) -> NewRunCost {
        let unit_cost: UsdCents = unit.parse().unwrap();
        let quantity = Decimal::from(quantity);
        NewRunCost {
            cost_name: name.to_string(),
            quantity,
            unit_cost,
            total_cost: unit_cost.checked_extend(quantity).unwrap(),
        }
    }

    #[test]
    fn test_open_in_memory() {
        let db = RunDatabase::open_in_memory().unwrap();
        db.ping().unwrap();
    }

    #[test]
    fn test_reopen_file_database_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");

        let org_id = {
            let db = RunDatabase::open(&path).unwrap();
            db.upsert_organization("acme").unwrap().0.id
        };

        let db = RunDatabase::open(&path).unwrap();
        let (org, created) = db.upsert_organization("acme").unwrap();
        assert!(!created);
        assert_eq!(org.id, org_id);
    }

    #[test]
    fn test_upsert_organization_is_idempotent() {
        let db = RunDatabase::open_in_memory().unwrap();
        let (first, created) = db.upsert_organization("acme").unwrap();
        assert!(created);
        let (second, created) = db.upsert_organization("acme").unwrap();
        assert!(!created);
        assert_eq!(first, second);
    }

    #[test]
    fn test_upsert_user_requires_organization() {
        let db = RunDatabase::open_in_memory().unwrap();
        let missing = Uuid::new_v4();
        let err = db.upsert_user("u-1", missing).unwrap_err();
        assert!(matches!(err, LedgerError::OrganizationNotFound(id) if id == missing));

        let (org, _) = db.upsert_organization("acme").unwrap();
        let (user, created) = db.upsert_user("u-1", org.id).unwrap();
        assert!(created);
        assert_eq!(user.organization_id, org.id);
        let (again, created) = db.upsert_user("u-1", org.id).unwrap();
        assert!(!created);
        assert_eq!(again.id, user.id);
    }

    #[test]
    fn test_create_and_get_run() {
        let (db, org_id) = db_with_org();
        let run = db.create_run(&NewRun::new(org_id, "search", "enrich")).unwrap();

        let loaded = db.get_run(run.id).unwrap().unwrap();
        assert_eq!(loaded, run);
        assert_eq!(loaded.status, RunStatus::Running);
        assert!(loaded.completed_at.is_none());
        assert!(db.get_run(RunId::new()).unwrap().is_none());
    }

    #[test]
    fn test_create_run_unknown_parent_writes_nothing() {
        let (db, org_id) = db_with_org();
        let ghost = RunId::new();

        let err = db
            .create_run(&NewRun::new(org_id, "search", "enrich").with_parent(ghost))
            .unwrap_err();
        assert!(matches!(err, LedgerError::ParentRunNotFound(id) if id == ghost));
        assert!(err.to_string().contains(&ghost.to_string()));

        let conn = db.connection();
        let conn = conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_create_run_unknown_organization() {
        let db = RunDatabase::open_in_memory().unwrap();
        let err = db.create_run(&NewRun::new(Uuid::new_v4(), "s", "t")).unwrap_err();
        assert!(matches!(err, LedgerError::OrganizationNotFound(_)));
    }

    #[test]
    fn test_foreign_key_backstop_on_parent() {
        let (db, org_id) = db_with_org();
        let conn = db.connection();
        let conn = conn.lock().unwrap();
        let now = format_ts(&stored_now());

        let err = conn
            .execute(
                &format!("INSERT INTO runs ({RUN_COLUMNS}) VALUES (?1, ?2, NULL, 's', 't', 'running', ?3, ?4, NULL, ?4, ?4)"),
                params![RunId::new().to_string(), org_id.to_string(), RunId::new().to_string(), now],
            )
            .unwrap_err();
        assert!(is_foreign_key_violation(&err));
    }

    #[test]
    fn test_finish_run_transitions() {
        let (db, org_id) = db_with_org();
        let run = db.create_run(&NewRun::new(org_id, "s", "t")).unwrap();

        let done = db.finish_run(run.id, RunStatus::Completed).unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert!(done.completed_at.is_some());

        let err = db.finish_run(run.id, RunStatus::Failed).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition { from: RunStatus::Completed, to: RunStatus::Failed, .. }
        ));

        let err = db.finish_run(RunId::new(), RunStatus::Failed).unwrap_err();
        assert!(matches!(err, LedgerError::RunNotFound(_)));

        let err = db.finish_run(run.id, RunStatus::Running).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[test]
    fn test_children_of_batches_parents() {
        let (db, org_id) = db_with_org();
        let a = db.create_run(&NewRun::new(org_id, "s", "a")).unwrap();
        let b = db.create_run(&NewRun::new(org_id, "s", "b")).unwrap();
        let a1 = db.create_run(&NewRun::new(org_id, "s", "a1").with_parent(a.id)).unwrap();
        let b1 = db.create_run(&NewRun::new(org_id, "s", "b1").with_parent(b.id)).unwrap();
        db.create_run(&NewRun::new(org_id, "s", "a1x").with_parent(a1.id)).unwrap();

        let mut ids: Vec<RunId> = db.children_of(&[a.id, b.id]).unwrap().iter().map(|r| r.id).collect();
        ids.sort();
        let mut expected = vec![a1.id, b1.id];
        expected.sort();
        assert_eq!(ids, expected);
        assert!(db.children_of(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_insert_costs_stores_exact_text() {
        let (db, org_id) = db_with_org();
        let run = db.create_run(&NewRun::new(org_id, "s", "t")).unwrap();

        let inserted = db
            .insert_costs(run.id, &[priced("gpt-4o-input-token", 1000, "0.00025")])
            .unwrap();
        assert_eq!(inserted.len(), 1);

        let conn = db.connection();
        let conn = conn.lock().unwrap();
        let (quantity, unit, total): (String, String, String) = conn
            .query_row(
                "SELECT quantity, unit_cost_in_usd_cents, total_cost_in_usd_cents FROM run_costs",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(quantity, "1000.000000");
        assert_eq!(unit, "0.0002500000");
        assert_eq!(total, "0.2500000000");
    }

    #[test]
    fn test_insert_costs_unknown_run_writes_nothing() {
        let (db, _) = db_with_org();
        let ghost = RunId::new();

        let err = db.insert_costs(ghost, &[priced("a", 1, "1")]).unwrap_err();
        assert!(matches!(err, LedgerError::RunNotFound(id) if id == ghost));

        let conn = db.connection();
        let conn = conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM run_costs", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_cost_totals_include_runs_without_rows() {
        let (db, org_id) = db_with_org();
        let priced_run = db.create_run(&NewRun::new(org_id, "s", "t")).unwrap();
        let empty_run = db.create_run(&NewRun::new(org_id, "s", "t")).unwrap();
        db.insert_costs(priced_run.id, &[priced("a", 3, "0.1"), priced("b", 1, "0.05")])
            .unwrap();

        let totals = db.cost_totals_by_run(&[priced_run.id, empty_run.id]).unwrap();
        assert_eq!(totals[&priced_run.id].to_string(), "0.3500000000");
        assert_eq!(totals[&empty_run.id].to_string(), "0.0000000000");
    }

    #[test]
    fn test_children_of_chunks_large_frontier() {
        let (db, org_id) = db_with_org();
        let root = db.create_run(&NewRun::new(org_id, "s", "root")).unwrap();
        let child = db.create_run(&NewRun::new(org_id, "s", "child").with_parent(root.id)).unwrap();

        // pad the frontier past one chunk with ids that have no children
        let mut frontier: Vec<RunId> = (0..IN_CLAUSE_CHUNK + 10).map(|_| RunId::new()).collect();
        frontier.push(root.id);

        let children = db.children_of(&frontier).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(format_ts(&ts), "2023-11-14T22:13:20.000000Z");
    }
}

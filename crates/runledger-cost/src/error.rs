//! Error types for run storage and cost accounting.

use runledger_core::{RunId, RunStatus};
use runledger_pricing::PricingError;
use thiserror::Error;
use uuid::Uuid;

/// Coarse error category, used to pick a response status at the API edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced entity does not exist
    NotFound,
    /// Request is malformed or violates an input rule
    InvalidInput,
    /// Request conflicts with stored state
    Conflict,
    /// A dependency (the pricing authority) could not serve the request
    UpstreamUnavailable,
    /// Anything else; surfaced opaquely
    Internal,
}

/// Run ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Run does not exist
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// Organization does not exist
    #[error("Organization not found: {0}")]
    OrganizationNotFound(Uuid),

    /// User does not exist
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    /// Parent run referenced at creation does not exist
    #[error("parentRunId {0} does not exist")]
    ParentRunNotFound(RunId),

    /// Status change not allowed from the run's current status
    #[error("run {run_id} is {from} and cannot become {to}")]
    InvalidTransition {
        /// Run being updated
        run_id: RunId,
        /// Current status
        from: RunStatus,
        /// Requested status
        to: RunStatus,
    },

    /// Pricing authority does not know this cost name
    #[error("Unknown cost: {0}")]
    UnknownCost(String),

    /// Pricing authority failed after retries
    #[error("pricing service unavailable: {0}")]
    PricingUnavailable(#[source] PricingError),

    /// Request violates an input rule
    #[error("{0}")]
    InvalidInput(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(String),

    /// Internal invariant failure (lock poisoning, crashed blocking task)
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Map this error onto the service-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::RunNotFound(_) | LedgerError::OrganizationNotFound(_) | LedgerError::UserNotFound(_) => {
                ErrorKind::NotFound
            }
            LedgerError::InvalidInput(_) => ErrorKind::InvalidInput,
            LedgerError::ParentRunNotFound(_) | LedgerError::InvalidTransition { .. } => ErrorKind::Conflict,
            LedgerError::PricingUnavailable(_) => ErrorKind::UpstreamUnavailable,
            // unknown cost is a client-side mistake about the price list
            LedgerError::UnknownCost(_) => ErrorKind::InvalidInput,
            LedgerError::Database(_)
            | LedgerError::Migration(_)
            | LedgerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is retryable (database busy or locked).
    pub fn is_retryable(&self) -> bool {
        is_database_locked_error(self)
    }

    /// Translate a pricing failure into the ledger taxonomy.
    pub fn from_pricing(error: PricingError) -> Self {
        match error {
            PricingError::NotFound(name) => LedgerError::UnknownCost(name),
            PricingError::Internal(message) => LedgerError::Internal(message),
            other => LedgerError::PricingUnavailable(other),
        }
    }
}

/// Check if a LedgerError indicates a database lock.
pub fn is_database_locked_error(error: &LedgerError) -> bool {
    match error {
        LedgerError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
            e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked
        }
        _ => false,
    }
}

/// Check if a rusqlite error is a foreign key violation.
pub(crate) fn is_foreign_key_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let run_id = RunId::new();
        assert_eq!(LedgerError::RunNotFound(run_id).kind(), ErrorKind::NotFound);
        assert_eq!(LedgerError::ParentRunNotFound(run_id).kind(), ErrorKind::Conflict);
        assert_eq!(
            LedgerError::InvalidTransition {
                run_id,
                from: RunStatus::Completed,
                to: RunStatus::Failed,
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(LedgerError::InvalidInput("x".into()).kind(), ErrorKind::InvalidInput);
        assert_eq!(
            LedgerError::Internal("poisoned".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_pricing_translation() {
        let err = LedgerError::from_pricing(PricingError::NotFound("gpt-x".into()));
        assert!(matches!(err, LedgerError::UnknownCost(ref n) if n == "gpt-x"));
        assert_eq!(err.to_string(), "Unknown cost: gpt-x");

        let err = LedgerError::from_pricing(PricingError::Upstream { status: 503 });
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);

        let err = LedgerError::from_pricing(PricingError::Transient("timeout".into()));
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);

        let err = LedgerError::from_pricing(PricingError::InvalidResponse("bad".into()));
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }

    #[test]
    fn test_parent_message_names_id() {
        let parent = RunId::new();
        let err = LedgerError::ParentRunNotFound(parent);
        assert_eq!(err.to_string(), format!("parentRunId {parent} does not exist"));
    }

    #[test]
    fn test_locked_is_retryable() {
        let locked = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(LedgerError::Database(locked).is_retryable());
        assert!(!LedgerError::InvalidInput("x".into()).is_retryable());
    }
}

//! HTTP error mapping.
//!
//! Every failure leaves the service as `{"error": "<message>"}` with a status
//! derived from the ledger error kind.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use runledger_core::RunId;
use runledger_cost::{ErrorKind, LedgerError};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

/// Body of every error response.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(as = Error)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ApiError {
    /// Map a ledger failure raised by `operation`.
    ///
    /// Internal failures are logged here with the operation and run id, then
    /// surfaced without detail.
    pub fn from_ledger(err: LedgerError, operation: &'static str, run_id: Option<RunId>) -> Self {
        // unknown cost names are well-formed requests the pricing authority rejects
        if matches!(err, LedgerError::UnknownCost(_)) {
            return Self::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string());
        }

        match err.kind() {
            ErrorKind::NotFound => Self::not_found(err.to_string()),
            ErrorKind::InvalidInput => Self::bad_request(err.to_string()),
            ErrorKind::Conflict => Self::new(StatusCode::CONFLICT, err.to_string()),
            ErrorKind::UpstreamUnavailable => Self::new(StatusCode::BAD_GATEWAY, err.to_string()),
            ErrorKind::Internal => {
                match run_id {
                    Some(run_id) => error!(operation, run_id = %run_id, error = ?err, "Request failed"),
                    None => error!(operation, error = ?err, "Request failed"),
                }
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        Self::bad_request("id must be a UUID")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

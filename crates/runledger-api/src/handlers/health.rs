//! Liveness and store connectivity probe.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use runledger_cost::run_blocking;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::state::AppState;

pub const SERVICE_NAME: &str = "runledger";

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(value_type = String, example = "ok")]
    pub status: &'static str,
    #[schema(value_type = String, example = "runledger")]
    pub service: &'static str,
    #[schema(value_type = String, example = "ok")]
    pub database: &'static str,
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match run_blocking(&state.db, |db| db.ping()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                service: SERVICE_NAME,
                database: "ok",
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Database probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    service: SERVICE_NAME,
                    database: "unreachable",
                }),
            )
        }
    }
}

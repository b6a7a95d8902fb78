//! Organization and user upserts keyed by external id.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use runledger_cost::{Organization, User, run_blocking};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use super::required;
use crate::error::{ApiError, ApiResult, ErrorBody};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrganizationRequest {
    pub external_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub external_id: Option<String>,
    pub organization_id: Option<Uuid>,
}

fn upsert_status(created: bool) -> StatusCode {
    if created { StatusCode::CREATED } else { StatusCode::OK }
}

/// POST /v1/organizations
#[utoipa::path(
    post,
    path = "/v1/organizations",
    request_body = CreateOrganizationRequest,
    responses(
        (status = 201, description = "Organization created", body = Organization),
        (status = 200, description = "Organization already exists", body = Organization),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
    ),
    tag = "accounts",
    security(("apiKey" = []))
)]
pub async fn upsert_organization(
    State(state): State<AppState>,
    payload: Result<Json<CreateOrganizationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Organization>)> {
    let Json(req) = payload?;
    let external_id = required(req.external_id, "externalId")?;

    let (org, created) = run_blocking(&state.db, move |db| db.upsert_organization(&external_id))
        .await
        .map_err(|e| ApiError::from_ledger(e, "upsert_organization", None))?;
    if created {
        info!(organization_id = %org.id, external_id = %org.external_id, "Created organization");
    }
    Ok((upsert_status(created), Json(org)))
}

/// POST /v1/users
#[utoipa::path(
    post,
    path = "/v1/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 200, description = "User already exists", body = User),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Organization not found", body = ErrorBody),
    ),
    tag = "accounts",
    security(("apiKey" = []))
)]
pub async fn upsert_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let Json(req) = payload?;
    let external_id = required(req.external_id, "externalId")?;
    let organization_id = req
        .organization_id
        .ok_or_else(|| ApiError::bad_request("organizationId is required"))?;

    let (user, created) = run_blocking(&state.db, move |db| db.upsert_user(&external_id, organization_id))
        .await
        .map_err(|e| ApiError::from_ledger(e, "upsert_user", None))?;
    if created {
        info!(user_id = %user.id, organization_id = %organization_id, "Created user");
    }
    Ok((upsert_status(created), Json(user)))
}

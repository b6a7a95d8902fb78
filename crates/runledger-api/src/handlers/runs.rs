//! Run lifecycle, cost recording, reports and summaries.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use runledger_core::{RunId, RunStatus};
use runledger_cost::{
    CostItem, CostReport, GroupBy, NewRun, Page, Run, RunCost, RunFilter, RunQuery, SummaryEntry, run_blocking,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use super::required;
use crate::error::{ApiError, ApiResult, ErrorBody};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    pub organization_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub task_name: Option<String>,
    pub user_id: Option<Uuid>,
    #[schema(value_type = Option<String>)]
    pub parent_run_id: Option<RunId>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRunRequest {
    /// `completed` or `failed`
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddCostsRequest {
    pub items: Option<Vec<CostItem>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddCostsResponse {
    pub costs: Vec<RunCost>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRunsParams {
    pub organization_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub task_name: Option<String>,
    pub user_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListRunsResponse {
    pub runs: Vec<Run>,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryParams {
    pub organization_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub task_name: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub group_by: Option<GroupBy>,
}

#[derive(Debug, Serialize, ToSchema)]
#[schema(as = CostSummaryResponse)]
pub struct SummaryResponse {
    pub breakdown: Vec<SummaryEntry>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn organization_filter(organization_id: Option<Uuid>) -> ApiResult<RunFilter> {
    organization_id
        .map(RunFilter::for_organization)
        .ok_or_else(|| ApiError::bad_request("organizationId query param is required"))
}

/// POST /v1/runs
#[utoipa::path(
    post,
    path = "/v1/runs",
    request_body = CreateRunRequest,
    responses(
        (status = 201, description = "Run created", body = Run),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 409, description = "Parent run does not exist", body = ErrorBody),
    ),
    tag = "runs",
    security(("apiKey" = []))
)]
pub async fn create_run(
    State(state): State<AppState>,
    payload: Result<Json<CreateRunRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let Json(req) = payload?;
    let organization_id = req
        .organization_id
        .ok_or_else(|| ApiError::bad_request("organizationId is required"))?;
    let service_name = required(req.service_name, "serviceName")?;
    let task_name = required(req.task_name, "taskName")?;

    let mut new_run = NewRun::new(organization_id, service_name, task_name);
    if let Some(user_id) = req.user_id {
        new_run = new_run.with_user(user_id);
    }
    if let Some(parent) = req.parent_run_id {
        new_run = new_run.with_parent(parent);
    }

    let run = run_blocking(&state.db, move |db| db.create_run(&new_run))
        .await
        .map_err(|e| ApiError::from_ledger(e, "create_run", None))?;
    info!(
        run_id = %run.id,
        parent_run_id = ?run.parent_run_id,
        service = %run.service_name,
        task = %run.task_name,
        "Created run"
    );
    Ok((StatusCode::CREATED, Json(run)))
}

/// GET /v1/runs
#[utoipa::path(
    get,
    path = "/v1/runs",
    params(
        ("organizationId" = Uuid, Query, description = "Organization to list runs for"),
        ("serviceName" = Option<String>, Query, description = "Filter by service"),
        ("taskName" = Option<String>, Query, description = "Filter by task"),
        ("userId" = Option<Uuid>, Query, description = "Filter by user"),
        ("status" = Option<String>, Query, description = "running, completed or failed"),
        ("startedAfter" = Option<String>, Query, description = "RFC 3339 lower bound on startedAt"),
        ("startedBefore" = Option<String>, Query, description = "RFC 3339 upper bound on startedAt"),
        ("limit" = Option<u32>, Query, description = "Page size, default 50, max 200"),
        ("offset" = Option<u32>, Query, description = "Rows to skip"),
    ),
    responses(
        (status = 200, description = "Runs, newest first", body = ListRunsResponse),
        (status = 400, description = "Invalid query", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
    ),
    tag = "runs",
    security(("apiKey" = []))
)]
pub async fn list_runs(
    State(state): State<AppState>,
    params: Result<Query<ListRunsParams>, QueryRejection>,
) -> ApiResult<Json<ListRunsResponse>> {
    let Query(params) = params?;
    let mut filter = organization_filter(params.organization_id)?;
    filter.service_name = non_empty(params.service_name);
    filter.task_name = non_empty(params.task_name);
    filter.user_id = params.user_id;
    filter.status = params.status;
    filter.started_after = params.started_after;
    filter.started_before = params.started_before;
    let page = Page::new(params.limit, params.offset);

    let runs = run_blocking(&state.db, move |db| RunQuery::new(db).list_runs(&filter, page))
        .await
        .map_err(|e| ApiError::from_ledger(e, "list_runs", None))?;
    Ok(Json(ListRunsResponse {
        runs,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// GET /v1/runs/summary
#[utoipa::path(
    get,
    path = "/v1/runs/summary",
    params(
        ("organizationId" = Uuid, Query, description = "Organization to summarize"),
        ("serviceName" = Option<String>, Query, description = "Filter by service"),
        ("taskName" = Option<String>, Query, description = "Filter by task"),
        ("startedAfter" = Option<String>, Query, description = "RFC 3339 lower bound on startedAt"),
        ("startedBefore" = Option<String>, Query, description = "RFC 3339 upper bound on startedAt"),
        ("groupBy" = Option<GroupBy>, Query, description = "Breakdown key, default serviceName"),
    ),
    responses(
        (status = 200, description = "Cost breakdown", body = SummaryResponse),
        (status = 400, description = "Invalid query", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
    ),
    tag = "runs",
    security(("apiKey" = []))
)]
pub async fn summary(
    State(state): State<AppState>,
    params: Result<Query<SummaryParams>, QueryRejection>,
) -> ApiResult<Json<SummaryResponse>> {
    let Query(params) = params?;
    let mut filter = organization_filter(params.organization_id)?;
    filter.service_name = non_empty(params.service_name);
    filter.task_name = non_empty(params.task_name);
    filter.started_after = params.started_after;
    filter.started_before = params.started_before;
    let group_by = params.group_by.unwrap_or_default();

    let breakdown = run_blocking(&state.db, move |db| RunQuery::new(db).summary(&filter, group_by))
        .await
        .map_err(|e| ApiError::from_ledger(e, "summary", None))?;
    Ok(Json(SummaryResponse { breakdown }))
}

/// GET /v1/runs/{id}
#[utoipa::path(
    get,
    path = "/v1/runs/{id}",
    params(("id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run with its costs and descendant rollup", body = CostReport),
        (status = 400, description = "Malformed id", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Run not found", body = ErrorBody),
    ),
    tag = "runs",
    security(("apiKey" = []))
)]
pub async fn get_run(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<CostReport>> {
    let Path(id) = id?;
    let run_id = RunId(id);
    let report = state
        .rollup
        .report(run_id)
        .await
        .map_err(|e| ApiError::from_ledger(e, "get_run", Some(run_id)))?;
    Ok(Json(report))
}

/// PATCH /v1/runs/{id}
#[utoipa::path(
    patch,
    path = "/v1/runs/{id}",
    params(("id" = Uuid, Path, description = "Run id")),
    request_body = UpdateRunRequest,
    responses(
        (status = 200, description = "Run finished", body = Run),
        (status = 400, description = "Invalid status or id", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Run not found", body = ErrorBody),
        (status = 409, description = "Run already finished", body = ErrorBody),
    ),
    tag = "runs",
    security(("apiKey" = []))
)]
pub async fn update_run(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateRunRequest>, JsonRejection>,
) -> ApiResult<Json<Run>> {
    let Path(id) = id?;
    let Json(req) = payload?;
    let status = match req.status.as_deref() {
        Some("completed") => RunStatus::Completed,
        Some("failed") => RunStatus::Failed,
        _ => return Err(ApiError::bad_request("status must be 'completed' or 'failed'")),
    };

    let run_id = RunId(id);
    let run = run_blocking(&state.db, move |db| db.finish_run(run_id, status))
        .await
        .map_err(|e| ApiError::from_ledger(e, "update_run", Some(run_id)))?;
    info!(run_id = %run_id, status = %status, "Finished run");
    Ok(Json(run))
}

/// POST /v1/runs/{id}/costs
#[utoipa::path(
    post,
    path = "/v1/runs/{id}/costs",
    params(("id" = Uuid, Path, description = "Run id")),
    request_body = AddCostsRequest,
    responses(
        (status = 201, description = "Costs recorded", body = AddCostsResponse),
        (status = 400, description = "Invalid items or id", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Run not found", body = ErrorBody),
        (status = 422, description = "Unknown cost name", body = ErrorBody),
        (status = 502, description = "Pricing service unavailable", body = ErrorBody),
    ),
    tag = "runs",
    security(("apiKey" = []))
)]
pub async fn add_costs(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<AddCostsRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AddCostsResponse>)> {
    let Path(id) = id?;
    let Json(req) = payload?;
    let items = req
        .items
        .filter(|items| !items.is_empty())
        .ok_or_else(|| ApiError::bad_request("items array is required"))?;

    let run_id = RunId(id);
    let costs = state
        .writer
        .record_costs(run_id, &items)
        .await
        .map_err(|e| ApiError::from_ledger(e, "add_costs", Some(run_id)))?;
    Ok((StatusCode::CREATED, Json(AddCostsResponse { costs })))
}

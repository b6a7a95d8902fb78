//! OpenAPI document served at `/openapi.json`.

use axum::Json;
use runledger_cost::{CostItem, CostReport, DescendantCost, GroupBy, Organization, Run, RunCost, SummaryEntry, User};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::API_KEY_HEADER;
use crate::error::ErrorBody;
use crate::handlers::accounts::{CreateOrganizationRequest, CreateUserRequest};
use crate::handlers::health::HealthResponse;
use crate::handlers::runs::{
    AddCostsRequest, AddCostsResponse, CreateRunRequest, ListRunsResponse, SummaryResponse, UpdateRunRequest,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Runs Service",
        description = "Run tracking with hierarchical cost rollups"
    ),
    paths(
        crate::handlers::health::health,
        openapi_json,
        crate::handlers::accounts::upsert_organization,
        crate::handlers::accounts::upsert_user,
        crate::handlers::runs::create_run,
        crate::handlers::runs::list_runs,
        crate::handlers::runs::summary,
        crate::handlers::runs::get_run,
        crate::handlers::runs::update_run,
        crate::handlers::runs::add_costs,
    ),
    components(schemas(
        ErrorBody,
        HealthResponse,
        Organization,
        User,
        CreateOrganizationRequest,
        CreateUserRequest,
        Run,
        RunCost,
        DescendantCost,
        CostReport,
        CostItem,
        GroupBy,
        SummaryEntry,
        CreateRunRequest,
        UpdateRunRequest,
        AddCostsRequest,
        AddCostsResponse,
        ListRunsResponse,
        SummaryResponse,
    )),
    modifiers(&ApiKeySecurity)
)]
pub struct ApiDoc;

/// Registers the `apiKey` header scheme the `/v1` routes reference.
struct ApiKeySecurity;

impl Modify for ApiKeySecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "apiKey",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
        );
    }
}

/// GET /openapi.json
#[utoipa::path(
    get,
    path = "/openapi.json",
    responses((status = 200, description = "OpenAPI document")),
    tag = "meta"
)]
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

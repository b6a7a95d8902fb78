//! # runledger-api
//!
//! The HTTP surface of runledger: an axum [`Router`] over the run store, the
//! cost writer and the rollup engine. Everything under `/v1` requires the
//! configured `X-API-Key`; `/health` and `/openapi.json` are open. CORS
//! preflights are answered before the key check.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod state;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use openapi::ApiDoc;
pub use state::AppState;

/// Build the service router.
pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/v1/organizations", post(handlers::accounts::upsert_organization))
        .route("/v1/users", post(handlers::accounts::upsert_user))
        .route("/v1/runs", post(handlers::runs::create_run).get(handlers::runs::list_runs))
        .route("/v1/runs/summary", get(handlers::runs::summary))
        .route(
            "/v1/runs/{id}",
            get(handlers::runs::get_run).patch(handlers::runs::update_run),
        )
        .route("/v1/runs/{id}/costs", post(handlers::runs::add_costs))
        .route_layer(from_fn_with_state(state.clone(), auth::require_api_key));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/openapi.json", get(openapi::openapi_json))
        .merge(v1)
        .fallback(handlers::not_found)
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

//! `X-API-Key` check for the `/v1` routes.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(key) if key == &*state.api_key => next.run(request).await,
        _ => {
            debug!(path = %request.uri().path(), "Rejected request without a valid API key");
            ApiError::unauthorized().into_response()
        }
    }
}

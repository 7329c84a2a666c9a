use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::server::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.relay.registry().len(),
    }))
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

/// The root serves nothing; this is a signaling endpoint.
pub async fn root_forbidden() -> impl IntoResponse {
    (StatusCode::FORBIDDEN, "websocket connections only")
}

pub async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

//! Liveness/readiness endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value as JsonValue};

use crate::api::AppState;
use crate::database;

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<JsonValue>) {
    match database::health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "database": "up"})),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded", "database": "down"})),
        ),
    }
}

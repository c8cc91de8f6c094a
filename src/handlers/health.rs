// src/handlers/health.rs

use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;

use super::rest::AppState;

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// 就绪检查：数据库连通才算 ready
pub async fn ready_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.db.ping().await {
        Ok(()) => Ok(Json(json!({ "status": "ready" }))),
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

//! Health check endpoint

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::api::state::ApiState;

/// GET /api/health
///
/// Reports the store's health and how much the engine is watching. Answers 503 when the
/// store is unhealthy or unreachable.
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<Value>) {
    let devices = state.engine.tracker().len().await;
    let timers = state.engine.timer_count().await;

    let (code, storage) = match state.store().health_check().await {
        Ok(health) if health.healthy => (StatusCode::OK, json!(health)),
        Ok(health) => (StatusCode::SERVICE_UNAVAILABLE, json!(health)),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "healthy": false, "message": e.to_string() }),
        ),
    };

    let status = if code == StatusCode::OK { "ok" } else { "degraded" };
    (
        code,
        Json(json!({
            "status": status,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "devices": devices,
            "timers": timers,
            "storage": storage,
        })),
    )
}

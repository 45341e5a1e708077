//! Alert settings endpoints
//!
//! The settings are a flat key/value map; alert delivery reads it on every dispatch, so
//! changes apply to the next alert without a restart.

use std::collections::HashMap;

use axum::{Json, extract::State};
use tracing::info;

use crate::api::error::ApiResult;
use crate::api::state::ApiState;

/// GET /api/settings
pub async fn get_settings(State(state): State<ApiState>) -> ApiResult<Json<HashMap<String, String>>> {
    Ok(Json(state.store().load_settings().await?))
}

/// POST /api/settings
///
/// Upserts the given keys and returns the full map.
pub async fn save_settings(
    State(state): State<ApiState>,
    Json(settings): Json<HashMap<String, String>>,
) -> ApiResult<Json<HashMap<String, String>>> {
    let keys = settings.len();
    state.store().save_settings(settings).await?;
    info!(keys, "settings saved");
    Ok(Json(state.store().load_settings().await?))
}

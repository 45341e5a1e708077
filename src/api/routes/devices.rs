//! Device lifecycle endpoints

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::storage::NewDevice;
use crate::{DeviceId, MonitoredDevice};

/// GET /api/devices
///
/// Live state of every device, ordered by id
pub async fn list_devices(State(state): State<ApiState>) -> Json<Vec<MonitoredDevice>> {
    Json(state.engine.snapshot().await)
}

/// POST /api/devices
pub async fn create_device(
    State(state): State<ApiState>,
    Json(device): Json<NewDevice>,
) -> ApiResult<(StatusCode, Json<MonitoredDevice>)> {
    let device = state.engine.create_device(device).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

/// PUT /api/devices/:id
///
/// Services listed with their `id` are kept, the rest of the old services are removed.
pub async fn update_device(
    State(state): State<ApiState>,
    Path(id): Path<DeviceId>,
    Json(device): Json<NewDevice>,
) -> ApiResult<Json<MonitoredDevice>> {
    let device = state.engine.update_device(id, device).await?;
    Ok(Json(device))
}

/// DELETE /api/devices/:id
pub async fn delete_device(
    State(state): State<ApiState>,
    Path(id): Path<DeviceId>,
) -> ApiResult<StatusCode> {
    if state.engine.delete_device(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("device #{id} not found")))
    }
}

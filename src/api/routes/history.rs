//! Downtime and latency history endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::storage::{DowntimeInterval, LatencySample};
use crate::{DeviceId, EntityRef, ServiceId};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

/// Query parameters for history reads
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Max results (default: 50)
    limit: Option<usize>,
}

impl HistoryQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

async fn require_device(state: &ApiState, id: DeviceId) -> ApiResult<()> {
    match state.store().get_device(id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound(format!("device #{id} not found"))),
    }
}

/// GET /api/devices/:id/history
pub async fn device_history(
    State(state): State<ApiState>,
    Path(id): Path<DeviceId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<DowntimeInterval>>> {
    require_device(&state, id).await?;
    let intervals = state
        .store()
        .downtime_history(EntityRef::Device(id), query.limit())
        .await?;
    Ok(Json(intervals))
}

/// GET /api/devices/:id/latency
pub async fn device_latency(
    State(state): State<ApiState>,
    Path(id): Path<DeviceId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<LatencySample>>> {
    require_device(&state, id).await?;
    let samples = state
        .store()
        .latency_history(EntityRef::Device(id), query.limit())
        .await?;
    Ok(Json(samples))
}

/// GET /api/services/:id/history
pub async fn service_history(
    State(state): State<ApiState>,
    Path(id): Path<ServiceId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<DowntimeInterval>>> {
    let intervals = state
        .store()
        .downtime_history(EntityRef::Service(id), query.limit())
        .await?;
    Ok(Json(intervals))
}

/// GET /api/services/:id/latency
pub async fn service_latency(
    State(state): State<ApiState>,
    Path(id): Path<ServiceId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<LatencySample>>> {
    let samples = state
        .store()
        .latency_history(EntityRef::Service(id), query.limit())
        .await?;
    Ok(Json(samples))
}

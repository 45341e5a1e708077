//! Storage backend trait definition
//!
//! This module defines the `MonitorStore` trait the engine persists through.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{DeviceRecord, DowntimeInterval, LatencySample, NewDevice};
use crate::{DeviceId, EntityRef, EntityStatus};

/// Health status of the storage backend
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// The engine treats the store as a collaborator: device/service CRUD, the
/// `last_status` columns, append-only downtime and latency logs, and the flat
/// settings map alert delivery reads from.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`. Calls for unrelated entities arrive
/// concurrently from independent check tasks; no cross-entity transaction is needed.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Load every device with its services, ordered by id
    async fn load_devices(&self) -> StorageResult<Vec<DeviceRecord>>;

    /// Load one device with its services
    async fn get_device(&self, id: DeviceId) -> StorageResult<Option<DeviceRecord>>;

    /// Create a device and its services; status starts as `unknown`
    async fn create_device(&self, device: NewDevice) -> StorageResult<DeviceRecord>;

    /// Replace a device's fields and service list
    ///
    /// Services referenced by id are updated in place (keeping `last_status`),
    /// services without id are created, and services no longer listed are deleted
    /// together with their logs. Returns `None` if the device does not exist.
    async fn update_device(
        &self,
        id: DeviceId,
        device: NewDevice,
    ) -> StorageResult<Option<DeviceRecord>>;

    /// Delete a device, its services and all their logs
    ///
    /// Returns whether the device existed.
    async fn delete_device(&self, id: DeviceId) -> StorageResult<bool>;

    /// Persist the status of a device or service
    ///
    /// `last_down_at` is only stored for services and only when `Some`.
    async fn update_status(
        &self,
        entity: EntityRef,
        status: EntityStatus,
        last_down_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    /// Insert a new open downtime interval
    async fn open_downtime(
        &self,
        entity: EntityRef,
        down_at: DateTime<Utc>,
    ) -> StorageResult<DowntimeInterval>;

    /// The open interval of an entity (up_at absent, most recent down_at)
    async fn find_open_downtime(&self, entity: EntityRef)
    -> StorageResult<Option<DowntimeInterval>>;

    /// Close an interval by id
    async fn close_downtime(
        &self,
        id: i64,
        up_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> StorageResult<()>;

    /// Append one latency sample
    async fn append_latency(&self, sample: LatencySample) -> StorageResult<()>;

    /// Most recent intervals of an entity, newest first
    async fn downtime_history(
        &self,
        entity: EntityRef,
        limit: usize,
    ) -> StorageResult<Vec<DowntimeInterval>>;

    /// The last `limit` latency samples of an entity, oldest first
    async fn latency_history(
        &self,
        entity: EntityRef,
        limit: usize,
    ) -> StorageResult<Vec<LatencySample>>;

    /// Read the flat settings map
    async fn load_settings(&self) -> StorageResult<HashMap<String, String>>;

    /// Upsert settings entries
    async fn save_settings(&self, settings: HashMap<String, String>) -> StorageResult<()>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

//! In-memory storage backend
//!
//! This backend keeps the fleet, the logs and the settings in process memory.
//! It's useful for:
//! - Testing without database dependencies
//! - Running with `{"backend": "none"}` when history is not needed
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, MonitorStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    DeviceRecord, DowntimeInterval, LatencySample, NewDevice, NewService, ServiceRecord,
};
use crate::{DeviceId, EntityRef, EntityStatus, ServiceId};

#[derive(Default)]
struct MemoryState {
    devices: BTreeMap<DeviceId, DeviceRecord>,
    downtime: Vec<DowntimeInterval>,
    latency: Vec<LatencySample>,
    settings: HashMap<String, String>,
    next_device_id: DeviceId,
    next_service_id: ServiceId,
    next_downtime_id: i64,
}

impl MemoryState {
    fn next_device_id(&mut self) -> DeviceId {
        self.next_device_id += 1;
        self.next_device_id
    }

    fn next_service_id(&mut self) -> ServiceId {
        self.next_service_id += 1;
        self.next_service_id
    }

    fn new_service(&mut self, device_id: DeviceId, service: &NewService) -> ServiceRecord {
        ServiceRecord {
            id: self.next_service_id(),
            device_id,
            service_name: service.service_name.clone(),
            port_number: service.port_number,
            check_interval: service.resolved_check_interval(),
            last_status: EntityStatus::Unknown,
            last_down_at: None,
        }
    }

    fn drop_logs(&mut self, entity: EntityRef) {
        self.downtime.retain(|d| d.entity != entity);
        self.latency.retain(|l| l.entity != entity);
    }
}

/// In-memory storage backend
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn load_devices(&self) -> StorageResult<Vec<DeviceRecord>> {
        Ok(self.state.read().await.devices.values().cloned().collect())
    }

    async fn get_device(&self, id: DeviceId) -> StorageResult<Option<DeviceRecord>> {
        Ok(self.state.read().await.devices.get(&id).cloned())
    }

    async fn create_device(&self, device: NewDevice) -> StorageResult<DeviceRecord> {
        let mut state = self.state.write().await;
        let id = state.next_device_id();
        let services = device
            .services
            .iter()
            .map(|s| state.new_service(id, s))
            .collect();

        let record = DeviceRecord {
            id,
            ping_interval: device.resolved_ping_interval(),
            name: device.name,
            ip_address: device.ip_address,
            kind: device.kind,
            last_status: EntityStatus::Unknown,
            services,
        };
        state.devices.insert(id, record.clone());

        debug!("in-memory backend: created device {}", id);
        Ok(record)
    }

    async fn update_device(
        &self,
        id: DeviceId,
        device: NewDevice,
    ) -> StorageResult<Option<DeviceRecord>> {
        let mut state = self.state.write().await;
        let Some(existing) = state.devices.get(&id).cloned() else {
            return Ok(None);
        };

        let mut services = Vec::with_capacity(device.services.len());
        for incoming in &device.services {
            let kept = incoming
                .id
                .and_then(|sid| existing.services.iter().find(|s| s.id == sid));
            match kept {
                Some(current) => services.push(ServiceRecord {
                    service_name: incoming.service_name.clone(),
                    port_number: incoming.port_number,
                    check_interval: incoming.resolved_check_interval(),
                    ..current.clone()
                }),
                None => services.push(state.new_service(id, incoming)),
            }
        }

        for removed in existing
            .services
            .iter()
            .filter(|old| !services.iter().any(|s| s.id == old.id))
        {
            state.drop_logs(EntityRef::Service(removed.id));
        }

        let record = DeviceRecord {
            id,
            ping_interval: device.resolved_ping_interval(),
            name: device.name,
            ip_address: device.ip_address,
            kind: device.kind,
            last_status: existing.last_status,
            services,
        };
        state.devices.insert(id, record.clone());

        Ok(Some(record))
    }

    async fn delete_device(&self, id: DeviceId) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let Some(removed) = state.devices.remove(&id) else {
            return Ok(false);
        };

        state.drop_logs(EntityRef::Device(id));
        for service in &removed.services {
            state.drop_logs(EntityRef::Service(service.id));
        }
        Ok(true)
    }

    async fn update_status(
        &self,
        entity: EntityRef,
        status: EntityStatus,
        last_down_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let mut state = self.state.write().await;
        match entity {
            EntityRef::Device(id) => {
                let device = state
                    .devices
                    .get_mut(&id)
                    .ok_or_else(|| StorageError::NotFound(entity.to_string()))?;
                device.last_status = status;
            }
            EntityRef::Service(id) => {
                let service = state
                    .devices
                    .values_mut()
                    .flat_map(|d| d.services.iter_mut())
                    .find(|s| s.id == id)
                    .ok_or_else(|| StorageError::NotFound(entity.to_string()))?;
                service.last_status = status;
                if let Some(at) = last_down_at {
                    service.last_down_at = Some(at);
                }
            }
        }
        Ok(())
    }

    async fn open_downtime(
        &self,
        entity: EntityRef,
        down_at: DateTime<Utc>,
    ) -> StorageResult<DowntimeInterval> {
        let mut state = self.state.write().await;
        state.next_downtime_id += 1;
        let interval = DowntimeInterval {
            id: state.next_downtime_id,
            entity,
            down_at,
            up_at: None,
            duration: None,
        };
        state.downtime.push(interval.clone());
        Ok(interval)
    }

    async fn find_open_downtime(
        &self,
        entity: EntityRef,
    ) -> StorageResult<Option<DowntimeInterval>> {
        let state = self.state.read().await;
        Ok(state
            .downtime
            .iter()
            .filter(|d| d.entity == entity && d.is_open())
            .max_by_key(|d| (d.down_at, d.id))
            .cloned())
    }

    async fn close_downtime(
        &self,
        id: i64,
        up_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let interval = state
            .downtime
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("downtime interval {id}")))?;
        interval.up_at = Some(up_at);
        interval.duration = Some(duration_secs);
        Ok(())
    }

    async fn append_latency(&self, sample: LatencySample) -> StorageResult<()> {
        self.state.write().await.latency.push(sample);
        Ok(())
    }

    async fn downtime_history(
        &self,
        entity: EntityRef,
        limit: usize,
    ) -> StorageResult<Vec<DowntimeInterval>> {
        let state = self.state.read().await;
        let mut history: Vec<_> = state
            .downtime
            .iter()
            .filter(|d| d.entity == entity)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.down_at.cmp(&a.down_at).then(b.id.cmp(&a.id)));
        history.truncate(limit);
        Ok(history)
    }

    async fn latency_history(
        &self,
        entity: EntityRef,
        limit: usize,
    ) -> StorageResult<Vec<LatencySample>> {
        let state = self.state.read().await;
        let matching: Vec<_> = state
            .latency
            .iter()
            .filter(|l| l.entity == entity)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn load_settings(&self) -> StorageResult<HashMap<String, String>> {
        Ok(self.state.read().await.settings.clone())
    }

    async fn save_settings(&self, settings: HashMap<String, String>) -> StorageResult<()> {
        self.state.write().await.settings.extend(settings);
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("devices".to_string(), state.devices.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}

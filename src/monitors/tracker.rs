//! In-memory authority for device and service status
//!
//! Each device sits behind its own lock, shared with its services. A check locks only
//! the device it belongs to, so checks of unrelated devices never contend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::trace;

use crate::probe::ProbeResult;
use crate::{CheckKind, CheckTarget, DeviceId, EntityStatus, MonitoredDevice};

/// What applying one probe result did
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub target: CheckTarget,
    pub previous: EntityStatus,
    pub status: EntityStatus,
    /// `status != previous`
    pub changed: bool,
    pub latency: Option<f64>,
    pub at: DateTime<Utc>,
    /// Full device state right after the update
    pub device: MonitoredDevice,
}

impl TransitionOutcome {
    pub fn went_offline(&self) -> bool {
        self.changed && self.status == EntityStatus::Offline
    }
}

/// Where a check should point its probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeParams {
    pub address: String,
    pub port: u16,
}

#[derive(Default)]
pub struct StatusTracker {
    devices: RwLock<HashMap<DeviceId, Arc<Mutex<MonitoredDevice>>>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a device, replacing any previous entry with the same id
    pub async fn insert(&self, device: MonitoredDevice) {
        self.devices
            .write()
            .await
            .insert(device.id, Arc::new(Mutex::new(device)));
    }

    /// Swap in a new definition of an existing device
    ///
    /// Status, latency and update time carry over for the device and for every service
    /// whose id survives, so an edit neither resets nor duplicates live state.
    pub async fn replace(&self, mut device: MonitoredDevice) -> MonitoredDevice {
        if let Some(previous) = self.get(device.id).await {
            device.status = previous.status;
            device.latency = previous.latency;
            device.last_update = previous.last_update;
            for service in &mut device.services {
                if let Some(old) = previous.service(service.id) {
                    service.status = old.status;
                    service.latency = old.latency;
                    service.last_update = old.last_update;
                    service.last_down_at = service.last_down_at.or(old.last_down_at);
                }
            }
        }
        self.insert(device.clone()).await;
        device
    }

    pub async fn get(&self, id: DeviceId) -> Option<MonitoredDevice> {
        let entry = self.devices.read().await.get(&id).cloned()?;
        let device = entry.lock().await;
        Some(device.clone())
    }

    /// Every tracked device, ordered by id
    pub async fn snapshot(&self) -> Vec<MonitoredDevice> {
        let entries: Vec<_> = self.devices.read().await.values().cloned().collect();

        let mut devices = Vec::with_capacity(entries.len());
        for entry in entries {
            devices.push(entry.lock().await.clone());
        }
        devices.sort_by_key(|d| d.id);
        devices
    }

    pub async fn remove(&self, id: DeviceId) -> Option<MonitoredDevice> {
        let entry = self.devices.write().await.remove(&id)?;
        let device = entry.lock().await;
        Some(device.clone())
    }

    pub async fn clear(&self) {
        self.devices.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Address and port to probe for `target`, or `None` if it is no longer tracked
    pub async fn probe_params(&self, target: CheckTarget) -> Option<ProbeParams> {
        let entry = self.devices.read().await.get(&target.device_id).cloned()?;
        let device = entry.lock().await;
        let port = match target.kind {
            CheckKind::Icmp => 0,
            CheckKind::Service(id) => device.service(id)?.port,
        };
        Some(ProbeParams {
            address: device.address.clone(),
            port,
        })
    }

    /// Apply a probe result to the entity behind `target`
    ///
    /// `on_applied` runs while the device lock is still held, so whatever it publishes
    /// is ordered exactly like the updates themselves. Returns `None` (and skips
    /// `on_applied`) when the entity has been removed in the meantime.
    pub async fn apply<F>(
        &self,
        target: CheckTarget,
        result: ProbeResult,
        at: DateTime<Utc>,
        on_applied: F,
    ) -> Option<TransitionOutcome>
    where
        F: FnOnce(&TransitionOutcome),
    {
        let entry = self.devices.read().await.get(&target.device_id).cloned()?;
        let mut device = entry.lock().await;

        let status = EntityStatus::from_alive(result.alive);
        let previous = match target.kind {
            CheckKind::Icmp => {
                let previous = device.status;
                device.status = status;
                device.latency = result.latency_ms;
                device.last_update = Some(at);
                previous
            }
            CheckKind::Service(id) => {
                let service = device.service_mut(id)?;
                let previous = service.status;
                service.status = status;
                service.latency = result.latency_ms;
                service.last_update = Some(at);
                if status == EntityStatus::Offline && previous != EntityStatus::Offline {
                    service.last_down_at = Some(at);
                }
                previous
            }
        };

        let outcome = TransitionOutcome {
            target,
            previous,
            status,
            changed: previous != status,
            latency: result.latency_ms,
            at,
            device: device.clone(),
        };
        trace!(%target, %previous, %status, "applied check result");

        on_applied(&outcome);
        Some(outcome)
    }
}

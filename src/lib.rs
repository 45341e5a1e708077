pub mod actors;
pub mod alerts;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod engine;
pub mod monitors;
pub mod probe;
pub mod storage;
pub mod util;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_CHECK_INTERVAL, DEFAULT_PING_INTERVAL, MAX_INTERVAL_SECS};
use crate::storage::schema::{DeviceRecord, ServiceRecord};

pub type DeviceId = i64;
pub type ServiceId = i64;

/// Reachability status of a device or service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// No check result has arrived yet
    #[default]
    Unknown,
    Online,
    Offline,
}

impl EntityStatus {
    pub fn from_alive(alive: bool) -> Self {
        if alive {
            EntityStatus::Online
        } else {
            EntityStatus::Offline
        }
    }

    /// Get the string representation (lowercase)
    ///
    /// This matches the serde serialization format and the `last_status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Unknown => "unknown",
            EntityStatus::Online => "online",
            EntityStatus::Offline => "offline",
        }
    }

    /// Parse a stored status, treating anything unrecognised as `Unknown`
    pub fn parse_lossy(value: &str) -> Self {
        match value {
            "online" => EntityStatus::Online,
            "offline" => EntityStatus::Offline,
            _ => EntityStatus::Unknown,
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of a persisted log row: exactly one of a device or a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    Device(DeviceId),
    Service(ServiceId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Device(id) => write!(f, "device #{id}"),
            EntityRef::Service(id) => write!(f, "service #{id}"),
        }
    }
}

/// What a single timer probes on its device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    /// Device-level reachability (ICMP echo)
    Icmp,
    /// One declared service of the device
    Service(ServiceId),
}

/// Key of one scheduled check
///
/// Service timers live in the namespace of their device, next to (never on top of)
/// the device's own ICMP timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckTarget {
    pub device_id: DeviceId,
    pub kind: CheckKind,
}

impl CheckTarget {
    pub fn icmp(device_id: DeviceId) -> Self {
        Self {
            device_id,
            kind: CheckKind::Icmp,
        }
    }

    pub fn service(device_id: DeviceId, service_id: ServiceId) -> Self {
        Self {
            device_id,
            kind: CheckKind::Service(service_id),
        }
    }

    /// The entity whose status this check drives
    pub fn entity(&self) -> EntityRef {
        match self.kind {
            CheckKind::Icmp => EntityRef::Device(self.device_id),
            CheckKind::Service(id) => EntityRef::Service(id),
        }
    }
}

impl fmt::Display for CheckTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CheckKind::Icmp => write!(f, "device #{}/icmp", self.device_id),
            CheckKind::Service(id) => write!(f, "device #{}/service #{id}", self.device_id),
        }
    }
}

/// Live state of a monitored device, as pushed to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredDevice {
    pub id: DeviceId,
    pub name: String,
    #[serde(rename = "ip")]
    pub address: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// ICMP check interval in seconds
    pub ping_interval: u64,
    pub status: EntityStatus,
    /// Round-trip time of the last ICMP check in milliseconds
    pub latency: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
    pub services: Vec<MonitoredService>,
}

/// Live state of one declared service of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredService {
    pub id: ServiceId,
    pub device_id: DeviceId,
    pub name: String,
    /// 0 means "ICMP only"
    pub port: u16,
    /// Check interval in seconds
    #[serde(rename = "interval")]
    pub check_interval: u64,
    pub status: EntityStatus,
    pub last_down_at: Option<DateTime<Utc>>,
    pub latency: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

impl MonitoredDevice {
    /// Re-hydrate live state from a persisted record
    ///
    /// Status comes from `last_status`; latency and timestamps start empty. A stored
    /// interval of 0 or above `MAX_INTERVAL_SECS` falls back to the default.
    pub fn from_record(record: &DeviceRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            address: record.ip_address.clone(),
            kind: record.kind.clone(),
            ping_interval: interval_or(record.ping_interval, DEFAULT_PING_INTERVAL),
            status: record.last_status,
            latency: None,
            last_update: None,
            services: record
                .services
                .iter()
                .map(MonitoredService::from_record)
                .collect(),
        }
    }

    pub fn service(&self, id: ServiceId) -> Option<&MonitoredService> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn service_mut(&mut self, id: ServiceId) -> Option<&mut MonitoredService> {
        self.services.iter_mut().find(|s| s.id == id)
    }

    /// Every timer this device needs, with its interval
    pub fn check_targets(&self) -> Vec<(CheckTarget, Duration)> {
        let mut targets = Vec::with_capacity(self.services.len() + 1);
        targets.push((
            CheckTarget::icmp(self.id),
            Duration::from_secs(self.ping_interval),
        ));
        for service in &self.services {
            targets.push((
                CheckTarget::service(self.id, service.id),
                Duration::from_secs(service.check_interval),
            ));
        }
        targets
    }
}

fn interval_or(value: u64, default: u64) -> u64 {
    if (1..=MAX_INTERVAL_SECS).contains(&value) {
        value
    } else {
        default
    }
}

impl MonitoredService {
    pub fn from_record(record: &ServiceRecord) -> Self {
        Self {
            id: record.id,
            device_id: record.device_id,
            name: record.service_name.clone(),
            port: record.port_number,
            check_interval: interval_or(record.check_interval, DEFAULT_CHECK_INTERVAL),
            status: record.last_status,
            last_down_at: record.last_down_at,
            latency: None,
            last_update: None,
        }
    }
}

//! Persisted record definitions
//!
//! ## Records
//!
//! - **DeviceRecord / ServiceRecord**: the monitored fleet, including the `last_status`
//!   columns the engine re-hydrates from on startup
//! - **DowntimeInterval**: one outage of a device or service, open until recovery
//! - **LatencySample**: append-only latency log
//!
//! Log rows are owned by an [`EntityRef`], so "device or service, never both" is a type
//! rather than two nullable columns. The SQLite backend still stores two columns (with a
//! CHECK constraint) and maps them back on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_CHECK_INTERVAL, DEFAULT_DEVICE_KIND, DEFAULT_PING_INTERVAL};
use crate::{DeviceId, EntityRef, EntityStatus, ServiceId};

/// A persisted device with its services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub ip_address: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub ping_interval: u64,
    pub last_status: EntityStatus,
    pub services: Vec<ServiceRecord>,
}

/// A persisted service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub device_id: DeviceId,
    pub service_name: String,
    pub port_number: u16,
    pub check_interval: u64,
    pub last_status: EntityStatus,
    pub last_down_at: Option<DateTime<Utc>>,
}

/// Device payload for create and update requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDevice {
    pub name: String,
    pub ip_address: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub ping_interval: Option<u64>,
    #[serde(default)]
    pub services: Vec<NewService>,
}

/// Service payload for create and update requests
///
/// On update, a service carrying the `id` of one of the device's existing services is
/// modified in place and keeps its `last_status`. Services without an id are created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewService {
    #[serde(default)]
    pub id: Option<ServiceId>,
    pub service_name: String,
    pub port_number: u16,
    #[serde(default)]
    pub check_interval: Option<u64>,
}

fn default_kind() -> String {
    DEFAULT_DEVICE_KIND.to_string()
}

impl NewDevice {
    pub fn resolved_ping_interval(&self) -> u64 {
        self.ping_interval.unwrap_or(DEFAULT_PING_INTERVAL)
    }
}

impl NewService {
    pub fn resolved_check_interval(&self) -> u64 {
        self.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL)
    }
}

/// One outage of a device or service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DowntimeInterval {
    pub id: i64,
    pub entity: EntityRef,
    pub down_at: DateTime<Utc>,
    /// `None` while the outage is ongoing
    pub up_at: Option<DateTime<Utc>>,
    /// Whole seconds between `down_at` and `up_at`
    pub duration: Option<i64>,
}

impl DowntimeInterval {
    pub fn is_open(&self) -> bool {
        self.up_at.is_none()
    }
}

/// Whole seconds between two instants, rounded down and clamped at zero
pub fn downtime_seconds(down_at: DateTime<Utc>, up_at: DateTime<Utc>) -> i64 {
    (up_at - down_at).num_seconds().max(0)
}

/// One latency measurement of a successful check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub entity: EntityRef,
    /// Milliseconds
    pub latency: f64,
    pub timestamp: DateTime<Utc>,
}

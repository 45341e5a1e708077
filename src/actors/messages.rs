//! Message types for actor communication
//!
//! 1. **Commands**: Sent to one timer actor via its mpsc channel
//! 2. **Events**: Live updates broadcast to every connected observer

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{DeviceId, MonitoredDevice};

/// Commands that can be sent to a timer actor
#[derive(Debug)]
pub enum TimerCommand {
    /// Run the check immediately, serialized with scheduled fires
    CheckNow {
        /// Signalled once the check has completed
        respond_to: oneshot::Sender<()>,
    },

    /// Stop the timer
    ///
    /// Commands are only read between checks, so an in-flight check always
    /// completes before the actor exits.
    Shutdown,
}

/// Event pushed to live observers
///
/// Serialized as `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum LiveEvent {
    /// Full snapshot, first message on every new connection
    Init(Vec<MonitoredDevice>),

    /// Device state after any check of the device or one of its services
    DeviceUpdate(MonitoredDevice),

    /// Same payload as `DeviceUpdate`, only when a status changed
    StatusChange(MonitoredDevice),

    DeviceAdded(MonitoredDevice),
    DeviceUpdated(MonitoredDevice),
    DeviceDeleted(DeviceId),
}

impl LiveEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            LiveEvent::Init(_) => "init",
            LiveEvent::DeviceUpdate(_) => "device-update",
            LiveEvent::StatusChange(_) => "status-change",
            LiveEvent::DeviceAdded(_) => "device-added",
            LiveEvent::DeviceUpdated(_) => "device-updated",
            LiveEvent::DeviceDeleted(_) => "device-deleted",
        }
    }

    /// The device this event is about, if it is about a single one
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            LiveEvent::Init(_) => None,
            LiveEvent::DeviceUpdate(d)
            | LiveEvent::StatusChange(d)
            | LiveEvent::DeviceAdded(d)
            | LiveEvent::DeviceUpdated(d) => Some(d.id),
            LiveEvent::DeviceDeleted(id) => Some(*id),
        }
    }
}

//! Live state fan-out to connected observers

use std::collections::HashSet;

use tokio::sync::broadcast;
use tracing::{trace, warn};

use super::messages::LiveEvent;
use crate::{DeviceId, MonitoredDevice};
use crate::monitors::StatusTracker;

/// Broadcasts live events to every subscriber
///
/// Subscribers that fall more than the channel capacity behind skip the missed events
/// and continue with the newest ones.
#[derive(Clone)]
pub struct LivePublisher {
    sender: broadcast::Sender<LiveEvent>,
}

impl LivePublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all current subscribers; returns how many received it
    pub fn publish(&self, event: LiveEvent) -> usize {
        let name = event.event_name();
        match self.sender.send(event) {
            Ok(receivers) => {
                trace!(event = name, receivers, "published live event");
                receivers
            }
            // no observers connected
            Err(_) => 0,
        }
    }

    /// Connect a new observer
    ///
    /// The receiver is attached before the snapshot is taken, so nothing applied after
    /// the snapshot can be missed, and `init` is always the first event delivered. A
    /// `device-added` for a device already in the snapshot is dropped.
    pub async fn subscribe(&self, tracker: &StatusTracker) -> LiveSubscription {
        let receiver = self.sender.subscribe();
        let snapshot = tracker.snapshot().await;
        LiveSubscription {
            known: snapshot.iter().map(|d| d.id).collect(),
            init: Some(snapshot),
            receiver,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event stream of one observer
pub struct LiveSubscription {
    init: Option<Vec<MonitoredDevice>>,
    /// Devices delivered in `init` whose `device-added` may still be queued
    known: HashSet<DeviceId>,
    receiver: broadcast::Receiver<LiveEvent>,
}

impl LiveSubscription {
    /// Next event, starting with `init`; `None` once the publisher is gone
    pub async fn next(&mut self) -> Option<LiveEvent> {
        if let Some(snapshot) = self.init.take() {
            return Some(LiveEvent::Init(snapshot));
        }

        loop {
            match self.receiver.recv().await {
                Ok(LiveEvent::DeviceAdded(device)) if self.known.remove(&device.id) => {
                    trace!(id = device.id, "device-added already in init, dropped");
                }
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("live observer lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

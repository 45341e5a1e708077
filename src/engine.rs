//! The monitoring engine
//!
//! ## Check pipeline
//!
//! ```text
//! timer fires → probe → StatusTracker::apply ─┬─→ publish status-change (if changed)
//!                                             └─→ publish device-update
//!                      on transition: persist status → DowntimeRecorder → spawn alert
//!                      always:        LatencyRecorder (alive with latency only)
//! ```
//!
//! Lifecycle operations (create, update, delete) stop the affected timers before they
//! touch the store or the tracker, so a check never races the mutation of its entity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use crate::actors::{Check, LiveEvent, LivePublisher, LiveSubscription, Scheduler};
use crate::alerts::{Alert, AlertDispatcher};
use crate::config::{Config, MAX_INTERVAL_SECS};
use crate::monitors::{DowntimeRecorder, LatencyRecorder, StatusTracker};
use crate::probe::ProbeSet;
use crate::storage::{MonitorStore, NewDevice, StorageError};
use crate::{CheckKind, CheckTarget, DeviceId, EntityStatus, MonitoredDevice};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Rejected before any timer or record was touched
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("device #{0} not found")]
    DeviceNotFound(DeviceId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Reject an interval a timer cannot run with
fn validate_interval(secs: u64, what: &str) -> EngineResult<()> {
    if secs == 0 {
        return Err(EngineError::InvalidConfig(format!("{what} must be positive")));
    }
    if secs > MAX_INTERVAL_SECS {
        return Err(EngineError::InvalidConfig(format!(
            "{what} must not exceed {MAX_INTERVAL_SECS} seconds"
        )));
    }
    Ok(())
}

/// Reject definitions that cannot be monitored
pub fn validate_device(device: &NewDevice) -> EngineResult<()> {
    if device.name.trim().is_empty() {
        return Err(EngineError::InvalidConfig("device name is empty".into()));
    }
    if device.ip_address.trim().is_empty() {
        return Err(EngineError::InvalidConfig("device address is empty".into()));
    }
    if let Some(secs) = device.ping_interval {
        validate_interval(secs, "ping interval")?;
    }
    for service in &device.services {
        if service.service_name.trim().is_empty() {
            return Err(EngineError::InvalidConfig("service name is empty".into()));
        }
        if let Some(secs) = service.check_interval {
            validate_interval(
                secs,
                &format!("check interval of service {}", service.service_name),
            )?;
        }
    }
    Ok(())
}

/// Everything a single check touches
struct CheckPipeline {
    tracker: Arc<StatusTracker>,
    probes: ProbeSet,
    store: Arc<dyn MonitorStore>,
    downtime: DowntimeRecorder,
    latency: LatencyRecorder,
    alerts: AlertDispatcher,
    publisher: LivePublisher,
}

#[async_trait]
impl Check for CheckPipeline {
    #[instrument(skip(self), fields(target = %target))]
    async fn run(&self, target: CheckTarget) {
        let Some(params) = self.tracker.probe_params(target).await else {
            trace!("target no longer tracked");
            return;
        };

        let result = self.probes.check(&params.address, params.port).await;
        let at = Utc::now();

        let publisher = &self.publisher;
        let applied = self
            .tracker
            .apply(target, result, at, |outcome| {
                if outcome.changed {
                    publisher.publish(LiveEvent::StatusChange(outcome.device.clone()));
                }
                publisher.publish(LiveEvent::DeviceUpdate(outcome.device.clone()));
            })
            .await;
        let Some(outcome) = applied else {
            trace!("target removed during check");
            return;
        };

        let entity = target.entity();
        if outcome.changed {
            info!(%entity, previous = %outcome.previous, status = %outcome.status, "status changed");

            let last_down_at = match target.kind {
                CheckKind::Service(_) if outcome.status == EntityStatus::Offline => Some(at),
                _ => None,
            };
            if let Err(e) = self
                .store
                .update_status(entity, outcome.status, last_down_at)
                .await
            {
                warn!(%entity, "failed to persist status: {e}");
            }

            if let Err(e) = self
                .downtime
                .record_transition(entity, outcome.status, at)
                .await
            {
                warn!(%entity, "failed to record downtime: {e}");
            }

            if let Some(alert) = Alert::for_transition(&outcome) {
                self.alerts.dispatch(alert);
            }
        }

        if let Err(e) = self.latency.record(entity, &result, at).await {
            warn!(%entity, "failed to record latency: {e}");
        }
    }
}

/// Handle to the running engine
///
/// Cheap to clone; all clones drive the same timers and state.
#[derive(Clone)]
pub struct MonitorEngine {
    pipeline: Arc<CheckPipeline>,
    scheduler: Arc<Scheduler>,
    /// Serializes create/update/delete so two edits of one device never interleave
    lifecycle: Arc<Mutex<()>>,
}

impl MonitorEngine {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        probes: ProbeSet,
        alerts: AlertDispatcher,
        publisher: LivePublisher,
    ) -> Self {
        let pipeline = CheckPipeline {
            tracker: Arc::new(StatusTracker::new()),
            probes,
            downtime: DowntimeRecorder::new(store.clone()),
            latency: LatencyRecorder::new(store.clone()),
            store,
            alerts,
            publisher,
        };

        Self {
            pipeline: Arc::new(pipeline),
            scheduler: Arc::new(Scheduler::new()),
            lifecycle: Arc::new(Mutex::new(())),
        }
    }

    /// System probes, email and webhook alerts, sized from `config`
    pub fn from_config(store: Arc<dyn MonitorStore>, config: &Config) -> Self {
        Self::new(
            store.clone(),
            ProbeSet::system(config.probe.timeout()),
            AlertDispatcher::new(store),
            LivePublisher::new(config.broadcast_capacity),
        )
    }

    pub fn store(&self) -> &Arc<dyn MonitorStore> {
        &self.pipeline.store
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.pipeline.tracker
    }

    pub fn publisher(&self) -> &LivePublisher {
        &self.pipeline.publisher
    }

    /// Load every device from the store and start its timers
    ///
    /// Any state from a previous start is discarded first. Failing to load is fatal.
    #[instrument(skip(self))]
    pub async fn start(&self) -> EngineResult<usize> {
        let _guard = self.lifecycle.lock().await;

        let records = self.store().load_devices().await?;

        self.scheduler.shutdown_all().await;
        self.tracker().clear().await;

        for record in &records {
            let device = MonitoredDevice::from_record(record);
            self.tracker().insert(device.clone()).await;
            self.schedule(&device).await;
        }

        info!(
            "monitoring {} devices with {} timers",
            records.len(),
            self.scheduler.len().await
        );
        Ok(records.len())
    }

    async fn schedule(&self, device: &MonitoredDevice) {
        let check: Arc<dyn Check> = self.pipeline.clone();
        for (target, period) in device.check_targets() {
            if let Err(e) = self.scheduler.register(target, period, check.clone()).await {
                warn!(%target, "not scheduled: {e:#}");
            }
        }
    }

    /// Persist a new device and start monitoring it
    #[instrument(skip(self, device), fields(name = %device.name))]
    pub async fn create_device(&self, device: NewDevice) -> EngineResult<MonitoredDevice> {
        validate_device(&device)?;
        let _guard = self.lifecycle.lock().await;

        let record = self.store().create_device(device).await?;
        let device = MonitoredDevice::from_record(&record);

        self.tracker().insert(device.clone()).await;
        self.schedule(&device).await;
        self.publisher()
            .publish(LiveEvent::DeviceAdded(device.clone()));

        info!(id = device.id, "device added");
        Ok(device)
    }

    /// Replace a device's definition
    ///
    /// Timers stop first; live status of the device and of surviving services carries
    /// over. If the store rejects the update, the old timers are restored.
    #[instrument(skip(self, device))]
    pub async fn update_device(
        &self,
        id: DeviceId,
        device: NewDevice,
    ) -> EngineResult<MonitoredDevice> {
        validate_device(&device)?;
        let _guard = self.lifecycle.lock().await;

        self.scheduler.unregister_device(id).await;

        let record = match self.store().update_device(id, device).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(EngineError::DeviceNotFound(id)),
            Err(e) => {
                self.restore(id).await;
                return Err(e.into());
            }
        };

        let device = self
            .tracker()
            .replace(MonitoredDevice::from_record(&record))
            .await;
        self.schedule(&device).await;
        self.publisher()
            .publish(LiveEvent::DeviceUpdated(device.clone()));

        info!("device updated");
        Ok(device)
    }

    /// Stop monitoring a device and delete it with its services and logs
    ///
    /// Returns whether the device existed.
    #[instrument(skip(self))]
    pub async fn delete_device(&self, id: DeviceId) -> EngineResult<bool> {
        let _guard = self.lifecycle.lock().await;

        self.scheduler.unregister_device(id).await;

        let existed = match self.store().delete_device(id).await {
            Ok(existed) => existed,
            Err(e) => {
                self.restore(id).await;
                return Err(e.into());
            }
        };

        let tracked = self.tracker().remove(id).await.is_some();
        if existed || tracked {
            self.publisher().publish(LiveEvent::DeviceDeleted(id));
            info!("device deleted");
        }
        Ok(existed)
    }

    /// Restart timers of a device still in the tracker
    async fn restore(&self, id: DeviceId) {
        if let Some(device) = self.tracker().get(id).await {
            debug!(id, "restoring timers");
            self.schedule(&device).await;
        }
    }

    /// Change the period of one running timer
    ///
    /// The stored interval is untouched; the next update or restart uses it again.
    /// Returns `Ok(false)` if `target` has no timer.
    pub async fn reschedule(&self, target: CheckTarget, interval_secs: u64) -> EngineResult<bool> {
        validate_interval(interval_secs, "interval")?;
        self.scheduler
            .reschedule(target, Duration::from_secs(interval_secs))
            .await
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    /// Run one check now and wait for it; `false` if `target` is not scheduled
    pub async fn trigger(&self, target: CheckTarget) -> bool {
        self.scheduler.trigger(target).await
    }

    pub async fn is_scheduled(&self, target: CheckTarget) -> bool {
        self.scheduler.is_registered(target).await
    }

    pub async fn timer_count(&self) -> usize {
        self.scheduler.len().await
    }

    pub async fn subscribe(&self) -> LiveSubscription {
        self.publisher().subscribe(self.tracker()).await
    }

    pub async fn snapshot(&self) -> Vec<MonitoredDevice> {
        self.tracker().snapshot().await
    }

    pub async fn device(&self, id: DeviceId) -> Option<MonitoredDevice> {
        self.tracker().get(id).await
    }

    /// Stop every timer, waiting for in-flight checks
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        self.scheduler.shutdown_all().await;
        info!("monitoring stopped");
    }
}

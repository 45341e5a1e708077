//! Helper functions for integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodepulse::{
    DeviceId, EntityRef, EntityStatus,
    actors::{LiveEvent, LivePublisher, LiveSubscription},
    alerts::{Alert, AlertDispatcher, AlertError, Delivery, Notifier},
    engine::MonitorEngine,
    probe::{Probe, ProbeResult, ProbeSet},
    storage::{
        DeviceRecord, DowntimeInterval, HealthStatus, LatencySample, MemoryStore, MonitorStore,
        NewDevice, NewService, StorageError, StorageResult,
    },
};

/// Probe answering from a per-address script, recording every call
pub struct ScriptedProbe {
    results: Mutex<HashMap<String, ProbeResult>>,
    fallback: Mutex<ProbeResult>,
    calls: Mutex<Vec<(String, u16)>>,
    delay: Option<Duration>,
}

impl ScriptedProbe {
    pub fn new(fallback: ProbeResult) -> Arc<Self> {
        Arc::new(Self::build(fallback, None))
    }

    /// Every check takes `delay` before answering
    pub fn slow(fallback: ProbeResult, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(fallback, Some(delay)))
    }

    fn build(fallback: ProbeResult, delay: Option<Duration>) -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            fallback: Mutex::new(fallback),
            calls: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn set(&self, address: &str, result: ProbeResult) {
        self.results
            .lock()
            .unwrap()
            .insert(address.to_string(), result);
    }

    pub fn set_all(&self, result: ProbeResult) {
        self.results.lock().unwrap().clear();
        *self.fallback.lock().unwrap() = result;
    }

    pub fn calls(&self) -> Vec<(String, u16)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn check(&self, address: &str, port: u16) -> ProbeResult {
        self.calls
            .lock()
            .unwrap()
            .push((address.to_string(), port));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let results = self.results.lock().unwrap();
        results
            .get(address)
            .copied()
            .unwrap_or_else(|| *self.fallback.lock().unwrap())
    }
}

/// Notifier that keeps every alert it is offered
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records the alert, then reports a delivery error
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            alerts: Mutex::new(Vec::new()),
            failing: true,
        })
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(
        &self,
        alert: &Alert,
        _settings: &HashMap<String, String>,
    ) -> Result<Delivery, AlertError> {
        self.alerts.lock().unwrap().push(alert.clone());
        if self.failing {
            return Err(AlertError::Build("recipient rejected".to_string()));
        }
        Ok(Delivery::Sent)
    }
}

/// Everything a pipeline test needs to drive and observe the engine
pub struct Harness {
    pub store: Arc<dyn MonitorStore>,
    pub icmp: Arc<ScriptedProbe>,
    pub tcp: Arc<ScriptedProbe>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: MonitorEngine,
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()))
}

pub fn harness_with_store(store: Arc<dyn MonitorStore>) -> Harness {
    harness_with(
        store,
        ScriptedProbe::new(ProbeResult::dead()),
        ScriptedProbe::new(ProbeResult::dead()),
        RecordingNotifier::new(),
    )
}

pub fn harness_with(
    store: Arc<dyn MonitorStore>,
    icmp: Arc<ScriptedProbe>,
    tcp: Arc<ScriptedProbe>,
    notifier: Arc<RecordingNotifier>,
) -> Harness {
    let channel: Arc<dyn Notifier> = notifier.clone();
    let alerts = AlertDispatcher::with_notifiers(store.clone(), vec![channel]);
    let engine = MonitorEngine::new(
        store.clone(),
        ProbeSet::new(icmp.clone(), tcp.clone()),
        alerts,
        LivePublisher::new(256),
    );
    Harness {
        store,
        icmp,
        tcp,
        notifier,
        engine,
    }
}

pub fn device(name: &str, ip: &str) -> NewDevice {
    NewDevice {
        name: name.to_string(),
        ip_address: ip.to_string(),
        kind: "Server".to_string(),
        ping_interval: Some(10),
        services: vec![],
    }
}

pub fn service(name: &str, port: u16) -> NewService {
    NewService {
        id: None,
        service_name: name.to_string(),
        port_number: port,
        check_interval: Some(30),
    }
}

/// Subscribe and swallow the `init` snapshot
pub async fn subscribe(engine: &MonitorEngine) -> LiveSubscription {
    let mut subscription = engine.subscribe().await;
    match subscription.next().await {
        Some(LiveEvent::Init(_)) => subscription,
        other => panic!("expected init event, got {other:?}"),
    }
}

/// Every event currently buffered for the subscription
pub async fn drain(subscription: &mut LiveSubscription) -> Vec<LiveEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(50), subscription.next()).await
    {
        events.push(event);
    }
    events
}

/// Statuses carried by the `status-change` events of a device
pub fn status_changes(events: &[LiveEvent], id: DeviceId) -> Vec<EntityStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            LiveEvent::StatusChange(device) if device.id == id => Some(device.status),
            _ => None,
        })
        .collect()
}

/// Poll until `condition` holds, failing the test after two seconds
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Memory store whose writes can be switched to fail
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn write(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed("database is locked".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionFailed("unable to open database".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MonitorStore for FlakyStore {
    async fn load_devices(&self) -> StorageResult<Vec<DeviceRecord>> {
        self.read()?;
        self.inner.load_devices().await
    }

    async fn get_device(&self, id: DeviceId) -> StorageResult<Option<DeviceRecord>> {
        self.read()?;
        self.inner.get_device(id).await
    }

    async fn create_device(&self, device: NewDevice) -> StorageResult<DeviceRecord> {
        self.write()?;
        self.inner.create_device(device).await
    }

    async fn update_device(
        &self,
        id: DeviceId,
        device: NewDevice,
    ) -> StorageResult<Option<DeviceRecord>> {
        self.write()?;
        self.inner.update_device(id, device).await
    }

    async fn delete_device(&self, id: DeviceId) -> StorageResult<bool> {
        self.write()?;
        self.inner.delete_device(id).await
    }

    async fn update_status(
        &self,
        entity: EntityRef,
        status: EntityStatus,
        last_down_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        self.write()?;
        self.inner.update_status(entity, status, last_down_at).await
    }

    async fn open_downtime(
        &self,
        entity: EntityRef,
        down_at: DateTime<Utc>,
    ) -> StorageResult<DowntimeInterval> {
        self.write()?;
        self.inner.open_downtime(entity, down_at).await
    }

    async fn find_open_downtime(
        &self,
        entity: EntityRef,
    ) -> StorageResult<Option<DowntimeInterval>> {
        self.read()?;
        self.inner.find_open_downtime(entity).await
    }

    async fn close_downtime(
        &self,
        id: i64,
        up_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> StorageResult<()> {
        self.write()?;
        self.inner.close_downtime(id, up_at, duration_secs).await
    }

    async fn append_latency(&self, sample: LatencySample) -> StorageResult<()> {
        self.write()?;
        self.inner.append_latency(sample).await
    }

    async fn downtime_history(
        &self,
        entity: EntityRef,
        limit: usize,
    ) -> StorageResult<Vec<DowntimeInterval>> {
        self.read()?;
        self.inner.downtime_history(entity, limit).await
    }

    async fn latency_history(
        &self,
        entity: EntityRef,
        limit: usize,
    ) -> StorageResult<Vec<LatencySample>> {
        self.read()?;
        self.inner.latency_history(entity, limit).await
    }

    async fn load_settings(&self) -> StorageResult<HashMap<String, String>> {
        self.read()?;
        self.inner.load_settings().await
    }

    async fn save_settings(&self, settings: HashMap<String, String>) -> StorageResult<()> {
        self.write()?;
        self.inner.save_settings(settings).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

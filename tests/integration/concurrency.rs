//! Integration tests for concurrent checks and lifecycle operations

use std::sync::Arc;
use std::time::Duration;

use nodepulse::{
    CheckTarget, EntityRef, EntityStatus,
    probe::ProbeResult,
    storage::{MemoryStore, MonitorStore},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_many_devices_checked_concurrently() {
    let h = harness();
    let mut ids = Vec::new();
    for i in 0..20 {
        let created = h
            .engine
            .create_device(device(&format!("node-{i}"), &format!("10.3.0.{i}")))
            .await
            .unwrap();
        ids.push(created.id);
    }
    for i in (0..20).step_by(2) {
        h.icmp
            .set(&format!("10.3.0.{i}"), ProbeResult::alive(Some(i as f64)));
    }

    let triggers = ids
        .iter()
        .map(|id| h.engine.trigger(CheckTarget::icmp(*id)));
    let ran = futures::future::join_all(triggers).await;
    assert!(ran.into_iter().all(|r| r));

    for (i, id) in ids.iter().enumerate() {
        let expected = if i % 2 == 0 {
            EntityStatus::Online
        } else {
            EntityStatus::Offline
        };
        assert_eq!(h.engine.device(*id).await.unwrap().status, expected);

        let history = h
            .store
            .downtime_history(EntityRef::Device(*id), 10)
            .await
            .unwrap();
        assert_eq!(history.len(), usize::from(i % 2 == 1));
    }
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_triggers_of_one_target_never_double_open() {
    let h = harness();
    let created = h.engine.create_device(device("nas", "10.3.1.1")).await.unwrap();
    let target = CheckTarget::icmp(created.id);

    let triggers = (0..10).map(|_| h.engine.trigger(target));
    futures::future::join_all(triggers).await;

    let history = h
        .store
        .downtime_history(EntityRef::Device(created.id), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_delete_waits_for_in_flight_check() {
    let store: Arc<dyn MonitorStore> = Arc::new(MemoryStore::new());
    let h = harness_with(
        store,
        ScriptedProbe::slow(ProbeResult::dead(), Duration::from_secs(2)),
        ScriptedProbe::new(ProbeResult::dead()),
        RecordingNotifier::new(),
    );
    let created = h.engine.create_device(device("nas", "10.3.2.1")).await.unwrap();
    let target = CheckTarget::icmp(created.id);

    let engine = h.engine.clone();
    let in_flight = tokio::spawn(async move { engine.trigger(target).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.icmp.call_count(), 1);

    assert!(h.engine.delete_device(created.id).await.unwrap());
    assert!(in_flight.await.unwrap());

    // the check applied before the delete; nothing of it survives
    assert!(h.engine.device(created.id).await.is_none());
    assert!(
        h.store
            .downtime_history(EntityRef::Device(created.id), 10)
            .await
            .unwrap()
            .is_empty()
    );

    let mut events = subscribe(&h.engine).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut events).await.is_empty());
    assert_eq!(h.icmp.call_count(), 1);
}

#[tokio::test]
async fn test_lifecycle_of_one_device_does_not_touch_another() {
    let h = harness();
    let keep = h.engine.create_device(device("keep", "10.3.3.1")).await.unwrap();
    let churn = h.engine.create_device(device("churn", "10.3.3.2")).await.unwrap();

    h.engine.trigger(CheckTarget::icmp(keep.id)).await;

    for i in 0..5 {
        h.engine
            .update_device(churn.id, device(&format!("churn-{i}"), "10.3.3.2"))
            .await
            .unwrap();
    }
    h.engine.delete_device(churn.id).await.unwrap();

    assert!(h.engine.is_scheduled(CheckTarget::icmp(keep.id)).await);
    assert_eq!(h.engine.timer_count().await, 1);
    assert_eq!(
        h.engine.device(keep.id).await.unwrap().status,
        EntityStatus::Offline
    );
    assert_eq!(
        h.store
            .downtime_history(EntityRef::Device(keep.id), 10)
            .await
            .unwrap()
            .len(),
        1
    );
    h.engine.shutdown().await;
}

//! Integration tests for the full check pipeline
//!
//! These tests verify what one check does end to end:
//! - Probe → StatusTracker → live events
//! - Transitions → status columns, downtime intervals, alerts
//! - Successful checks → latency samples

use assert_matches::assert_matches;
use nodepulse::{
    CheckTarget, EntityRef, EntityStatus,
    actors::LiveEvent,
    probe::ProbeResult,
    storage::MonitorStore,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_device_goes_down() {
    let h = harness();
    let created = h.engine.create_device(device("nas", "10.0.0.5")).await.unwrap();
    let entity = EntityRef::Device(created.id);
    let mut events = subscribe(&h.engine).await;

    assert!(h.engine.trigger(CheckTarget::icmp(created.id)).await);

    let history = h.store.downtime_history(entity, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_open());

    let events = drain(&mut events).await;
    assert_eq!(
        status_changes(&events, created.id),
        vec![EntityStatus::Offline]
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, LiveEvent::DeviceUpdate(d) if d.id == created.id))
    );

    let notifier = h.notifier.clone();
    wait_until(|| notifier.count() == 1).await;
    assert_eq!(h.notifier.alerts()[0].status, EntityStatus::Offline);
    assert_eq!(h.notifier.alerts()[0].entity, entity);

    assert!(h.store.latency_history(entity, 10).await.unwrap().is_empty());

    let persisted = h.store.get_device(created.id).await.unwrap().unwrap();
    assert_eq!(persisted.last_status, EntityStatus::Offline);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_device_recovers() {
    let h = harness();
    let created = h.engine.create_device(device("nas", "10.0.0.5")).await.unwrap();
    let target = CheckTarget::icmp(created.id);
    let entity = EntityRef::Device(created.id);

    h.engine.trigger(target).await;
    let mut events = subscribe(&h.engine).await;

    h.icmp.set("10.0.0.5", ProbeResult::alive(Some(42.0)));
    h.engine.trigger(target).await;

    let history = h.store.downtime_history(entity, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].is_open());
    assert!(history[0].duration.unwrap() >= 0);
    assert!(h.store.find_open_downtime(entity).await.unwrap().is_none());

    let samples = h.store.latency_history(entity, 10).await.unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].latency, 42.0);

    let events = drain(&mut events).await;
    assert_eq!(
        status_changes(&events, created.id),
        vec![EntityStatus::Online]
    );

    let live = h.engine.device(created.id).await.unwrap();
    assert_eq!(live.status, EntityStatus::Online);
    assert_eq!(live.latency, Some(42.0));
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_repeated_offline_keeps_one_interval() {
    let h = harness();
    let created = h.engine.create_device(device("nas", "10.0.0.5")).await.unwrap();
    let target = CheckTarget::icmp(created.id);
    let mut events = subscribe(&h.engine).await;

    for _ in 0..3 {
        h.engine.trigger(target).await;
    }

    let history = h
        .store
        .downtime_history(EntityRef::Device(created.id), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    let events = drain(&mut events).await;
    assert_eq!(status_changes(&events, created.id).len(), 1);
    let updates = events
        .iter()
        .filter(|e| matches!(e, LiveEvent::DeviceUpdate(_)))
        .count();
    assert_eq!(updates, 3);

    let notifier = h.notifier.clone();
    wait_until(|| notifier.count() >= 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.notifier.count(), 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_first_online_result_alerts_without_interval() {
    let h = harness();
    h.icmp.set_all(ProbeResult::alive(Some(3.5)));
    let created = h.engine.create_device(device("nas", "10.0.0.5")).await.unwrap();

    h.engine.trigger(CheckTarget::icmp(created.id)).await;

    let entity = EntityRef::Device(created.id);
    assert!(h.store.downtime_history(entity, 10).await.unwrap().is_empty());
    assert_eq!(h.store.latency_history(entity, 10).await.unwrap().len(), 1);

    let notifier = h.notifier.clone();
    wait_until(|| notifier.count() == 1).await;
    assert_eq!(h.notifier.alerts()[0].status, EntityStatus::Online);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_port_zero_uses_icmp_and_port_8080_uses_tcp() {
    let h = harness();
    let mut new = device("web", "10.0.0.8");
    new.services = vec![service("reachability", 0), service("http", 8080)];
    let created = h.engine.create_device(new).await.unwrap();
    let icmp_only = created.services[0].id;
    let http = created.services[1].id;

    for _ in 0..2 {
        h.engine
            .trigger(CheckTarget::service(created.id, icmp_only))
            .await;
        h.engine.trigger(CheckTarget::service(created.id, http)).await;
    }

    assert_eq!(
        h.icmp.calls(),
        vec![("10.0.0.8".to_string(), 0), ("10.0.0.8".to_string(), 0)]
    );
    assert_eq!(
        h.tcp.calls(),
        vec![("10.0.0.8".to_string(), 8080), ("10.0.0.8".to_string(), 8080)]
    );
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_service_transition_leaves_device_status() {
    let h = harness();
    h.icmp.set_all(ProbeResult::alive(Some(1.0)));
    let mut new = device("db", "10.0.0.9");
    new.services = vec![service("postgres", 5432)];
    let created = h.engine.create_device(new).await.unwrap();
    let service_id = created.services[0].id;

    h.engine.trigger(CheckTarget::icmp(created.id)).await;
    h.engine
        .trigger(CheckTarget::service(created.id, service_id))
        .await;

    let live = h.engine.device(created.id).await.unwrap();
    assert_eq!(live.status, EntityStatus::Online);
    assert_eq!(live.services[0].status, EntityStatus::Offline);
    assert!(live.services[0].last_down_at.is_some());

    let persisted = h.store.get_device(created.id).await.unwrap().unwrap();
    assert_eq!(persisted.last_status, EntityStatus::Online);
    assert_eq!(persisted.services[0].last_status, EntityStatus::Offline);
    assert!(persisted.services[0].last_down_at.is_some());

    let service_history = h
        .store
        .downtime_history(EntityRef::Service(service_id), 10)
        .await
        .unwrap();
    assert_eq!(service_history.len(), 1);
    assert!(
        h.store
            .downtime_history(EntityRef::Device(created.id), 10)
            .await
            .unwrap()
            .is_empty()
    );

    let notifier = h.notifier.clone();
    wait_until(|| notifier.count() == 2).await;
    let service_alert = h
        .notifier
        .alerts()
        .into_iter()
        .find(|a| a.entity == EntityRef::Service(service_id))
        .unwrap();
    assert!(service_alert.subject.contains("postgres"));
    assert!(service_alert.subject.contains("DOWN"));
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_two_devices_transition_independently() {
    let h = harness();
    let a = h.engine.create_device(device("a", "10.0.1.1")).await.unwrap();
    let b = h.engine.create_device(device("b", "10.0.1.2")).await.unwrap();

    let (ran_a, ran_b) = tokio::join!(
        h.engine.trigger(CheckTarget::icmp(a.id)),
        h.engine.trigger(CheckTarget::icmp(b.id)),
    );
    assert!(ran_a && ran_b);

    for id in [a.id, b.id] {
        let history = h
            .store
            .downtime_history(EntityRef::Device(id), 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entity, EntityRef::Device(id));
    }

    h.icmp.set("10.0.1.1", ProbeResult::alive(Some(5.0)));
    h.engine.trigger(CheckTarget::icmp(a.id)).await;
    h.engine.trigger(CheckTarget::icmp(b.id)).await;

    assert_eq!(
        h.engine.device(a.id).await.unwrap().status,
        EntityStatus::Online
    );
    assert_eq!(
        h.engine.device(b.id).await.unwrap().status,
        EntityStatus::Offline
    );
    assert!(
        h.store
            .find_open_downtime(EntityRef::Device(a.id))
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        h.store
            .find_open_downtime(EntityRef::Device(b.id))
            .await
            .unwrap()
            .is_some()
    );
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_events_reach_observers() {
    let h = harness();
    let mut events = subscribe(&h.engine).await;

    let created = h.engine.create_device(device("cam", "10.0.2.1")).await.unwrap();
    let mut edited = device("cam-renamed", "10.0.2.1");
    edited.services = vec![service("rtsp", 554)];
    h.engine.update_device(created.id, edited).await.unwrap();
    h.engine.delete_device(created.id).await.unwrap();

    let events = drain(&mut events).await;
    assert_eq!(events.len(), 3);
    assert_matches!(&events[0], LiveEvent::DeviceAdded(d) if d.name == "cam");
    assert_matches!(&events[1], LiveEvent::DeviceUpdated(d) if d.services.len() == 1);
    assert_matches!(&events[2], LiveEvent::DeviceDeleted(id) if *id == created.id);
}

//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Status and open intervals survive a restart of the engine
//! - A recovery after restart closes the interval opened before it
//! - Deleting a device removes its logs from SQLite

use std::sync::Arc;

use nodepulse::{
    CheckTarget, EntityRef, EntityStatus,
    probe::ProbeResult,
    storage::{MonitorStore, sqlite::SqliteStore},
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::*;

#[tokio::test]
async fn test_status_and_open_interval_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("nodepulse.db");

    let (device_id, service_id) = {
        let store: Arc<dyn MonitorStore> = Arc::new(SqliteStore::new(&db_path).await.unwrap());
        let h = harness_with_store(store);
        let mut new = device("nas", "10.4.0.1");
        new.services = vec![service("smb", 445)];
        let created = h.engine.create_device(new).await.unwrap();
        let service_id = created.services[0].id;

        h.engine.trigger(CheckTarget::icmp(created.id)).await;
        h.engine
            .trigger(CheckTarget::service(created.id, service_id))
            .await;

        h.engine.shutdown().await;
        h.store.close().await.unwrap();
        (created.id, service_id)
    };

    let store: Arc<dyn MonitorStore> = Arc::new(SqliteStore::new(&db_path).await.unwrap());
    let h = harness_with_store(store);
    assert_eq!(h.engine.start().await.unwrap(), 1);

    let live = h.engine.device(device_id).await.unwrap();
    assert_eq!(live.status, EntityStatus::Offline);
    assert_eq!(live.services[0].status, EntityStatus::Offline);
    assert!(live.services[0].last_down_at.is_some());
    assert!(live.latency.is_none());

    let open = h
        .store
        .find_open_downtime(EntityRef::Device(device_id))
        .await
        .unwrap();
    assert!(open.is_some());

    h.icmp.set_all(ProbeResult::alive(Some(42.0)));
    h.engine.trigger(CheckTarget::icmp(device_id)).await;

    let history = h
        .store
        .downtime_history(EntityRef::Device(device_id), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, open.unwrap().id);
    assert!(!history[0].is_open());

    let samples = h
        .store
        .latency_history(EntityRef::Device(device_id), 10)
        .await
        .unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].latency, 42.0);

    // the service is still down and keeps its own interval
    assert!(
        h.store
            .find_open_downtime(EntityRef::Service(service_id))
            .await
            .unwrap()
            .is_some()
    );
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_delete_cascades_to_logs() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("nodepulse.db");
    let store: Arc<dyn MonitorStore> = Arc::new(SqliteStore::new(&db_path).await.unwrap());
    let h = harness_with_store(store);

    let mut new = device("nas", "10.4.0.1");
    new.services = vec![service("smb", 445)];
    let created = h.engine.create_device(new).await.unwrap();
    let service_id = created.services[0].id;
    h.engine.trigger(CheckTarget::icmp(created.id)).await;
    h.engine
        .trigger(CheckTarget::service(created.id, service_id))
        .await;

    assert!(h.engine.delete_device(created.id).await.unwrap());

    assert!(h.store.get_device(created.id).await.unwrap().is_none());
    for entity in [EntityRef::Device(created.id), EntityRef::Service(service_id)] {
        assert!(h.store.downtime_history(entity, 10).await.unwrap().is_empty());
    }
}

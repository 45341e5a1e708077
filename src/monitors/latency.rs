use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::EntityRef;
use crate::probe::ProbeResult;
use crate::storage::{LatencySample, MonitorStore, StorageResult};

/// Appends a sample for every successful check that measured a latency
#[derive(Clone)]
pub struct LatencyRecorder {
    store: Arc<dyn MonitorStore>,
}

impl LatencyRecorder {
    pub fn new(store: Arc<dyn MonitorStore>) -> Self {
        Self { store }
    }

    /// Returns whether a sample was written
    pub async fn record(
        &self,
        entity: EntityRef,
        result: &ProbeResult,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let Some(latency) = result.latency_ms.filter(|_| result.alive) else {
            return Ok(false);
        };

        self.store
            .append_latency(LatencySample {
                entity,
                latency,
                timestamp: at,
            })
            .await?;
        Ok(true)
    }
}

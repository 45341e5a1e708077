use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::storage::schema::downtime_seconds;
use crate::storage::{DowntimeInterval, MonitorStore, StorageResult};
use crate::{EntityRef, EntityStatus};

/// What a transition did to the downtime log
#[derive(Debug, Clone, PartialEq)]
pub enum DowntimeChange {
    Opened(DowntimeInterval),
    /// Went offline while an interval was already open; nothing written
    AlreadyOpen(DowntimeInterval),
    Closed { id: i64, duration: i64 },
    /// Came back online without an open interval; nothing written
    NothingToClose,
    /// Transition to `unknown`, never produced by a check
    Ignored,
}

/// Opens an interval when an entity goes offline and closes it on recovery
#[derive(Clone)]
pub struct DowntimeRecorder {
    store: Arc<dyn MonitorStore>,
}

impl DowntimeRecorder {
    pub fn new(store: Arc<dyn MonitorStore>) -> Self {
        Self { store }
    }

    pub async fn record_transition(
        &self,
        entity: EntityRef,
        status: EntityStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<DowntimeChange> {
        match status {
            EntityStatus::Offline => {
                if let Some(open) = self.store.find_open_downtime(entity).await? {
                    debug!(%entity, id = open.id, "downtime interval already open");
                    return Ok(DowntimeChange::AlreadyOpen(open));
                }
                let interval = self.store.open_downtime(entity, at).await?;
                info!(%entity, id = interval.id, "downtime started");
                Ok(DowntimeChange::Opened(interval))
            }
            EntityStatus::Online => {
                let Some(open) = self.store.find_open_downtime(entity).await? else {
                    debug!(%entity, "recovered without an open downtime interval");
                    return Ok(DowntimeChange::NothingToClose);
                };
                let duration = downtime_seconds(open.down_at, at);
                self.store.close_downtime(open.id, at, duration).await?;
                info!(%entity, id = open.id, duration, "downtime ended");
                Ok(DowntimeChange::Closed {
                    id: open.id,
                    duration,
                })
            }
            EntityStatus::Unknown => Ok(DowntimeChange::Ignored),
        }
    }
}

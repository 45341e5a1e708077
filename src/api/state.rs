//! API shared state

use std::sync::Arc;

use crate::engine::MonitorEngine;
use crate::storage::MonitorStore;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Engine handle for live state and lifecycle operations
    pub engine: MonitorEngine,
}

impl ApiState {
    pub fn new(engine: MonitorEngine) -> Self {
        Self { engine }
    }

    pub fn store(&self) -> &Arc<dyn MonitorStore> {
        self.engine.store()
    }
}

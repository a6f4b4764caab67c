//! Shared state for the control API.

use std::sync::Arc;
use std::time::SystemTime;

use crate::db::StorageGateway;
use crate::indexer::{BlockScanner, PoolLifecycleManager};

/// Handles the API handlers need. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Scanner, for status, pause/resume and reindex.
    pub scanner: Arc<BlockScanner>,
    /// Pool manager, for manual add/remove.
    pub pools: Arc<PoolLifecycleManager>,
    /// Storage, for reads and the health check.
    pub storage: Arc<dyn StorageGateway>,
    /// Process start, for uptime.
    pub start_time: SystemTime,
}

impl AppState {
    /// Create a new AppState instance.
    #[must_use]
    pub fn new(scanner: Arc<BlockScanner>, storage: Arc<dyn StorageGateway>) -> Self {
        Self {
            pools: scanner.pools().clone(),
            scanner,
            storage,
            start_time: SystemTime::now(),
        }
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
            .as_secs()
    }
}

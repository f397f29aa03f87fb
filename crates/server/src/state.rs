// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use autoinsights_jobs::{JobScheduler, JobStore, MemoryJobStore};

use crate::config::ServerConfig;
use crate::workloads::WorkloadCatalog;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub config: ServerConfig,
    /// Job submission, live registry and final-state store.
    pub scheduler: JobScheduler,
    /// Workload kinds accepted by `POST /api/jobs`.
    pub workloads: WorkloadCatalog,
}

impl AppState {
    /// Built-in workloads and an in-memory status store.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(config.status_ttl));
        let workloads = WorkloadCatalog::builtin(config.stage_delay);
        Self::with_parts(config, store, workloads)
    }

    pub fn with_parts(
        config: ServerConfig,
        store: Arc<dyn JobStore>,
        workloads: WorkloadCatalog,
    ) -> Arc<Self> {
        let scheduler = JobScheduler::new(config.scheduler_config(), store);
        Arc::new(Self {
            start_time: Instant::now(),
            config,
            scheduler,
            workloads,
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

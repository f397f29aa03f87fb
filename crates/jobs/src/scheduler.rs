//! Accepts job submissions and runs them in the background.
//!
//! One tokio task per job, with a semaphore capping how many execute at
//! once. How progress is reported lives in the runner and the bus.

use std::sync::Arc;
use std::time::Duration;

use autoinsights_types::{JobId, JobSnapshot};
use metrics::{counter, gauge};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::bus::{ProgressBus, DEFAULT_QUEUE_CAPACITY};
use crate::plan::StagePlan;
use crate::record::JobRecord;
use crate::registry::{JobEntry, JobRegistry};
use crate::runner::JobRunner;
use crate::store::{JobStore, StoreError};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Jobs allowed to execute concurrently; the rest wait `queued`.
    pub max_concurrent_jobs: usize,
    /// Per-subscriber mailbox size on each job's progress bus.
    pub queue_capacity: usize,
    /// How long a finished job's bus stays registered, so viewers that are
    /// reconnecting can still pick up the terminal event from it.
    pub bus_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            bus_retention: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Front door for running jobs.
#[derive(Clone)]
pub struct JobScheduler {
    config: SchedulerConfig,
    registry: JobRegistry,
    store: Arc<dyn JobStore>,
    permits: Arc<Semaphore>,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig, store: Arc<dyn JobStore>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            config,
            registry: JobRegistry::new(),
            store,
            permits,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Register a new job and spawn its execution. The job and its progress
    /// bus exist (status `queued`) by the time this returns, so a viewer may
    /// subscribe before the first stage runs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, kind: &str, plan: StagePlan, params: Value) -> JobId {
        let id = JobId::generate();
        let record = Arc::new(JobRecord::new(id.clone(), kind));
        let bus = ProgressBus::new(id.clone(), self.config.queue_capacity);
        self.registry.insert(JobEntry {
            record: Arc::clone(&record),
            bus: bus.clone(),
        });

        counter!("jobs_submitted_total", "kind" => kind.to_string()).increment(1);
        gauge!("jobs_active").increment(1.0);
        tracing::info!(job_id = %id, kind, stages = plan.len(), "job submitted");

        let registry = self.registry.clone();
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);
        let retention = self.config.bus_retention;
        let kind = kind.to_string();
        let params = Arc::new(params);
        let job_id = id.clone();

        tokio::spawn(async move {
            if let Err(e) = store.save(record.snapshot()).await {
                tracing::warn!(job_id = %job_id, "failed to store queued job: {e}");
            }

            let permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(job_id = %job_id, "job pool closed, job not run: {e}");
                    return;
                }
            };
            let outcome = JobRunner::new(Arc::clone(&record), bus, params)
                .run(&plan)
                .await;
            drop(permit);

            gauge!("jobs_active").decrement(1.0);
            counter!(
                "jobs_finished_total",
                "kind" => kind,
                "status" => outcome.status().as_str()
            )
            .increment(1);

            if let Err(e) = store.save(record.snapshot()).await {
                tracing::error!(job_id = %job_id, "failed to store final job state: {e}");
            }

            tokio::time::sleep(retention).await;
            registry.remove(&job_id);
            tracing::debug!(job_id = %job_id, "progress bus torn down");
        });

        id
    }

    /// Current state of a job: live record first, then the store.
    pub async fn status(&self, id: &JobId) -> Result<Option<JobSnapshot>, SchedulerError> {
        if let Some(entry) = self.registry.get(id) {
            return Ok(Some(entry.record.snapshot()));
        }
        Ok(self.store.load(id).await?)
    }

    /// All jobs that are queued or running.
    pub fn active_jobs(&self) -> Vec<JobSnapshot> {
        self.registry.active()
    }
}

//! Job registry: every job whose progress bus is still alive, keyed by id.

use std::sync::Arc;

use autoinsights_types::{JobId, JobSnapshot};
use dashmap::DashMap;

use crate::bus::ProgressBus;
use crate::record::JobRecord;

/// A live job: its record plus the bus its runner publishes on.
pub struct JobEntry {
    pub record: Arc<JobRecord>,
    pub bus: ProgressBus,
}

/// Concurrent map of live jobs.
///
/// Entries are created at submission and removed once the job's bus has been
/// torn down. Lookups hand out `Arc`s so no map guard is ever held across an
/// `.await`.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<JobId, Arc<JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: JobEntry) -> Arc<JobEntry> {
        let entry = Arc::new(entry);
        self.jobs
            .insert(entry.record.id().clone(), Arc::clone(&entry));
        entry
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        self.jobs.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn remove(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        self.jobs.remove(id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Snapshots of every job that has not reached a terminal state.
    pub fn active(&self) -> Vec<JobSnapshot> {
        let mut active: Vec<JobSnapshot> = self
            .jobs
            .iter()
            .map(|e| e.value().record.snapshot())
            .filter(|s| !s.is_terminal())
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        active
    }
}

//! Job status store: the collaborator that keeps a job's state after its
//! progress bus is gone.

use std::time::Duration;

use async_trait::async_trait;
use autoinsights_types::{JobId, JobSnapshot};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job store backend error: {0}")]
    Backend(String),
}

/// Persistence seam for job state.
///
/// Once a terminal snapshot is saved for a job it is final: implementations
/// ignore any later save for that job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, snapshot: JobSnapshot) -> Result<(), StoreError>;

    async fn load(&self, id: &JobId) -> Result<Option<JobSnapshot>, StoreError>;

    /// Drop expired entries. Backends with native expiry leave this a no-op.
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// In-process store with a per-entry time-to-live.
pub struct MemoryJobStore {
    ttl: Duration,
    entries: DashMap<JobId, (JobSnapshot, Instant)>,
}

impl MemoryJobStore {
    /// One hour.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, snapshot: JobSnapshot) -> Result<(), StoreError> {
        let expires_at = Instant::now() + self.ttl;
        match self.entries.entry(snapshot.job_id.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().0.is_terminal() {
                    tracing::debug!(job_id = %snapshot.job_id, "terminal state already stored, ignoring save");
                } else {
                    existing.insert((snapshot, expires_at));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert((snapshot, expires_at));
            }
        }
        Ok(())
    }

    async fn load(&self, id: &JobId) -> Result<Option<JobSnapshot>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(id)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone()))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoinsights_types::JobStatus;
    use chrono::Utc;

    fn snapshot(id: &str, status: JobStatus, progress: u8) -> JobSnapshot {
        JobSnapshot {
            job_id: JobId::from(id),
            kind: "eda".to_string(),
            status,
            progress,
            message: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemoryJobStore::default();
        store.save(snapshot("a", JobStatus::Queued, 0)).await.unwrap();
        store.save(snapshot("a", JobStatus::Running, 30)).await.unwrap();

        let loaded = store.load(&JobId::from("a")).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.progress, 30);
        assert!(store.load(&JobId::from("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_snapshot_is_write_once() {
        let store = MemoryJobStore::default();
        store.save(snapshot("a", JobStatus::Completed, 100)).await.unwrap();
        store.save(snapshot("a", JobStatus::Running, 10)).await.unwrap();
        store.save(snapshot("a", JobStatus::Failed, 10)).await.unwrap();

        let loaded = store.load(&JobId::from("a")).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.progress, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let store = MemoryJobStore::new(Duration::from_secs(60));
        store.save(snapshot("a", JobStatus::Completed, 100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.load(&JobId::from("a")).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(store.load(&JobId::from("a")).await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty());
    }
}

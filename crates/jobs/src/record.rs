//! Live state of a single job.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{OnceLock, RwLock};

use autoinsights_types::{JobId, JobSnapshot, JobStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { result: Value, message: String },
    Failed { error: String, progress: u8 },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Mutable-in-place record of one job.
///
/// Status and progress are atomics so progress updates never contend with
/// readers. The outcome is written once through a `OnceLock`: after that the
/// record is effectively frozen and reads take no lock at all.
pub struct JobRecord {
    id: JobId,
    kind: String,
    created_at: DateTime<Utc>,
    status: AtomicU8,
    progress: AtomicU8,
    message: RwLock<Option<String>>,
    updated_at: RwLock<DateTime<Utc>>,
    outcome: OnceLock<(JobOutcome, DateTime<Utc>)>,
}

impl JobRecord {
    /// A freshly submitted job in `queued` state.
    pub fn new(id: JobId, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: kind.into(),
            created_at: now,
            status: AtomicU8::new(JobStatus::Queued as u8),
            progress: AtomicU8::new(0),
            message: RwLock::new(Some("Queued".to_string())),
            updated_at: RwLock::new(now),
            outcome: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn status(&self) -> JobStatus {
        if let Some((outcome, _)) = self.outcome.get() {
            return outcome.status();
        }
        JobStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(JobStatus::Failed)
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Acquire)
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.get().map(|(outcome, _)| outcome)
    }

    /// `queued -> running`. Returns `false` if the job was not queued.
    pub fn start(&self, message: impl Into<String>) -> bool {
        let started = self
            .status
            .compare_exchange(
                JobStatus::Queued as u8,
                JobStatus::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if started {
            self.set_message(message);
        }
        started
    }

    /// Record progress while running. Progress never goes backwards: a lower
    /// value than the current one leaves it untouched. Returns the progress
    /// now in effect, or `None` if the job is not running.
    pub fn advance(&self, progress: u8, message: impl Into<String>) -> Option<u8> {
        if self.status() != JobStatus::Running {
            return None;
        }
        let previous = self.progress.fetch_max(progress.min(100), Ordering::AcqRel);
        self.set_message(message);
        Some(previous.max(progress.min(100)))
    }

    /// Write the terminal state. Only the first call wins; later calls return
    /// `false` and change nothing.
    pub fn finish(&self, outcome: JobOutcome) -> bool {
        let status = outcome.status();
        let message = match &outcome {
            JobOutcome::Completed { message, .. } => message.clone(),
            JobOutcome::Failed { error, .. } => error.clone(),
        };
        if self.outcome.set((outcome, Utc::now())).is_err() {
            return false;
        }
        if status == JobStatus::Completed {
            self.progress.store(100, Ordering::Release);
        }
        self.status.store(status as u8, Ordering::Release);
        self.set_message(message);
        true
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let (result, error, finished_at) = match self.outcome.get() {
            Some((JobOutcome::Completed { result, .. }, at)) => (Some(result.clone()), None, Some(*at)),
            Some((JobOutcome::Failed { error, .. }, at)) => (None, Some(error.clone()), Some(*at)),
            None => (None, None, None),
        };
        let progress = match self.outcome.get() {
            Some((JobOutcome::Completed { .. }, _)) => 100,
            Some((JobOutcome::Failed { progress, .. }, _)) => *progress,
            None => self.progress(),
        };
        JobSnapshot {
            job_id: self.id.clone(),
            kind: self.kind.clone(),
            status: self.status(),
            progress,
            message: match self.message.read() {
                Ok(guard) => guard.clone(),
                Err(e) => {
                    tracing::error!("RwLock poisoned reading job message: {e}");
                    None
                }
            },
            result,
            error,
            created_at: self.created_at,
            updated_at: finished_at.unwrap_or_else(|| self.updated_at()),
        }
    }

    fn updated_at(&self) -> DateTime<Utc> {
        match self.updated_at.read() {
            Ok(guard) => *guard,
            Err(e) => *e.into_inner(),
        }
    }

    fn set_message(&self, msg: impl Into<String>) {
        match self.message.write() {
            Ok(mut guard) => *guard = Some(msg.into()),
            Err(e) => tracing::error!("RwLock poisoned writing job message: {e}"),
        }
        match self.updated_at.write() {
            Ok(mut guard) => *guard = Utc::now(),
            Err(e) => tracing::error!("RwLock poisoned writing job timestamp: {e}"),
        }
    }
}

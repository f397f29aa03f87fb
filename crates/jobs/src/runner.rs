//! Executes one job's stage plan and reports progress on its bus.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use autoinsights_types::ProgressEvent;
use futures_util::FutureExt;
use serde_json::{Map, Value};

use crate::bus::ProgressBus;
use crate::plan::{StageContext, StageError, StagePlan};
use crate::record::{JobOutcome, JobRecord};

/// Drives a single job through its plan.
///
/// Fail-fast: the first failing stage ends the job and no later stage runs.
/// Retrying is the scheduler's business, not the runner's. For a given job the
/// runner emits at most one terminal event, and it is always the last one.
pub struct JobRunner {
    record: Arc<JobRecord>,
    bus: ProgressBus,
    params: Arc<Value>,
}

impl JobRunner {
    pub fn new(record: Arc<JobRecord>, bus: ProgressBus, params: Arc<Value>) -> Self {
        Self { record, bus, params }
    }

    pub async fn run(self, plan: &StagePlan) -> JobOutcome {
        let job_id = self.record.id().clone();
        let kind = self.record.kind().to_string();
        let total = plan.len();

        if !self.record.start(format!("Running {total} stages")) {
            tracing::warn!(job_id = %job_id, status = %self.record.status(), "job is not queued, not running it");
            return self.record.outcome().cloned().unwrap_or_else(|| JobOutcome::Failed {
                error: "job was not in queued state".to_string(),
                progress: self.record.progress(),
            });
        }

        tracing::info!(job_id = %job_id, kind = %kind, stages = total, "job started");
        let started = Instant::now();
        let mut results = Map::new();
        let mut reached = 0u8;

        for (index, (stage, progress)) in plan.checkpoints().enumerate() {
            let ctx = StageContext {
                job_id: job_id.clone(),
                index,
                stage: stage.name().to_string(),
                params: Arc::clone(&self.params),
            };
            let stage_start = Instant::now();

            let outcome = match AssertUnwindSafe(stage.work().run(ctx)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(StageError::Panicked(panic_message(payload))),
            };

            match outcome {
                Ok(value) => {
                    results.insert(stage.name().to_string(), value);
                    let message = format!("Stage {}/{}: {} complete", index + 1, total, stage.name());
                    reached = self.record.advance(progress, message.clone()).unwrap_or(progress);
                    tracing::debug!(
                        job_id = %job_id,
                        stage = stage.name(),
                        progress = reached,
                        duration_ms = stage_start.elapsed().as_millis() as u64,
                        "stage complete"
                    );
                    // The last checkpoint is reported by the completion event itself.
                    if index + 1 < total {
                        self.publish(ProgressEvent::running(job_id.clone(), reached, message));
                    }
                }
                Err(e) => {
                    let error = format!("Stage '{}' failed: {e}", stage.name());
                    tracing::warn!(
                        job_id = %job_id,
                        stage = stage.name(),
                        progress = reached,
                        error = %e,
                        "job failed"
                    );
                    let outcome = JobOutcome::Failed {
                        error: error.clone(),
                        progress: reached,
                    };
                    if self.record.finish(outcome.clone()) {
                        self.publish(ProgressEvent::failed(job_id, reached, error));
                    }
                    return outcome;
                }
            }
        }

        let message = format!("{kind} completed successfully");
        let outcome = JobOutcome::Completed {
            result: Value::Object(results),
            message: message.clone(),
        };
        if self.record.finish(outcome.clone()) {
            tracing::info!(
                job_id = %job_id,
                kind = %kind,
                duration_secs = started.elapsed().as_secs_f64(),
                "job completed"
            );
            self.publish(ProgressEvent::completed(job_id, message));
        }
        outcome
    }

    fn publish(&self, event: ProgressEvent) {
        if let Err(e) = self.bus.publish(event) {
            tracing::warn!(job_id = %self.record.id(), "dropping progress event: {e}");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

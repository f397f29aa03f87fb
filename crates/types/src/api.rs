//! Job submission payloads.

use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};

/// Body of `POST /api/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    /// Workload kind, e.g. `"eda"`, `"automl"` or `"preprocessing"`.
    pub kind: String,
    /// Workload-specific parameters, passed through to the stage work.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Response to a successful submission: where to watch the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub kind: String,
    pub status: JobStatus,
    pub websocket_url: String,
}

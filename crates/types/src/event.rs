//! The progress event: the one message the gateway writes to a socket.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::job::{JobId, JobStatus};

/// A single status/progress update for one job.
///
/// Serialized as `{job_id, status, progress, message, timestamp}`. The
/// timestamp is informational only; messages without it still parse.
/// `progress` is any JSON number in `0..=100` on input, rounded to a whole
/// percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(deserialize_with = "deserialize_progress")]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "timestamp", default = "Utc::now")]
    pub emitted_at: DateTime<Utc>,
}

fn deserialize_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !(0.0..=100.0).contains(&value) {
        return Err(D::Error::custom(format!(
            "progress {value} is outside 0..=100"
        )));
    }
    Ok(value.round() as u8)
}

impl ProgressEvent {
    pub fn new(job_id: JobId, status: JobStatus, progress: u8, message: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            progress: progress.min(100),
            message: message.into(),
            emitted_at: Utc::now(),
        }
    }

    pub fn running(job_id: JobId, progress: u8, message: impl Into<String>) -> Self {
        Self::new(job_id, JobStatus::Running, progress, message)
    }

    pub fn completed(job_id: JobId, message: impl Into<String>) -> Self {
        Self::new(job_id, JobStatus::Completed, 100, message)
    }

    pub fn failed(job_id: JobId, progress: u8, error: impl Into<String>) -> Self {
        Self::new(job_id, JobStatus::Failed, progress, error)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = ProgressEvent::running(JobId::from("J1"), 45, "Stage 5/11: Missing data");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["job_id"], "J1");
        assert_eq!(json["status"], "running");
        assert_eq!(json["progress"], 45);
        assert_eq!(json["message"], "Stage 5/11: Missing data");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_event_parses_without_timestamp() {
        let event: ProgressEvent = serde_json::from_str(
            r#"{"job_id":"J1","status":"failed","progress":45,"message":"boom"}"#,
        )
        .unwrap();
        assert_eq!(event.status, JobStatus::Failed);
        assert!(event.is_terminal());
        assert_eq!(event.message, "boom");
    }

    fn parse_progress(progress: &str) -> Result<u8, serde_json::Error> {
        let text = format!(
            r#"{{"job_id":"J1","status":"running","progress":{progress},"message":"m"}}"#
        );
        serde_json::from_str::<ProgressEvent>(&text).map(|e| e.progress)
    }

    #[test]
    fn test_progress_accepts_any_json_number() {
        assert_eq!(parse_progress("45").unwrap(), 45);
        assert_eq!(parse_progress("45.0").unwrap(), 45);
        assert_eq!(parse_progress("45.5").unwrap(), 46);
        assert_eq!(parse_progress("0.2").unwrap(), 0);
        assert_eq!(parse_progress("100.0").unwrap(), 100);
    }

    #[test]
    fn test_progress_out_of_range_is_rejected() {
        assert!(parse_progress("100.5").is_err());
        assert!(parse_progress("-1").is_err());
        assert!(parse_progress("\"45\"").is_err());
    }

    #[test]
    fn test_completed_is_always_one_hundred() {
        let event = ProgressEvent::completed(JobId::from("J1"), "done");
        assert_eq!(event.progress, 100);
        assert!(event.is_terminal());
    }

    #[test]
    fn test_progress_is_clamped() {
        let event = ProgressEvent::running(JobId::from("J1"), 250, "overshoot");
        assert_eq!(event.progress, 100);
    }
}

//! Shared types for the Auto-Insights job-progress pipeline.
//!
//! Everything in here crosses a process boundary: the WebSocket wire message
//! (`ProgressEvent`), the status-query payload (`JobSnapshot`) and the job
//! submission request/response. Server and client both depend on this crate
//! so the two ends can never disagree on the schema.

pub mod api;
pub mod event;
pub mod job;

pub use api::{SubmitJobRequest, SubmitJobResponse};
pub use event::ProgressEvent;
pub use job::{JobId, JobSnapshot, JobStatus, UnknownStatus};

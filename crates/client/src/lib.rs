//! Reconnecting WebSocket client for live job progress.
//!
//! `ReconnectingClient` follows one job's `/ws/job/{job_id}` stream, hands
//! every progress event to a caller-supplied handler in order, and rides
//! out dropped connections with bounded, cancellable retries.

pub mod client;
pub mod config;
pub mod error;

pub use client::{ClientState, ReconnectingClient, SessionOutcome};
pub use config::{Backoff, ClientConfig};
pub use error::ClientError;

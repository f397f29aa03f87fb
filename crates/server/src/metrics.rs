//! Application metrics for Prometheus monitoring.
//!
//! The job crate records through the `metrics` facade; this module installs
//! the Prometheus recorder behind it and renders the `/metrics` payload.

use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("jobs_submitted_total", "Jobs accepted, by workload kind");
    describe_counter!(
        "jobs_finished_total",
        "Jobs that reached a terminal state, by kind and status"
    );
    describe_gauge!("jobs_active", "Jobs queued or running");
    describe_counter!(
        "progress_events_published_total",
        "Progress events published on job buses"
    );
    describe_counter!(
        "progress_events_dropped_total",
        "Progress events evicted from slow subscribers' mailboxes"
    );
    describe_gauge!("gateway_connections", "Open job-progress WebSocket connections");
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Keeps `gateway_connections` accurate even if the connection task is
/// cancelled mid-stream.
pub struct ConnectionGauge(());

impl ConnectionGauge {
    pub fn open() -> Self {
        gauge!("gateway_connections").increment(1.0);
        Self(())
    }
}

impl Drop for ConnectionGauge {
    fn drop(&mut self) {
        gauge!("gateway_connections").decrement(1.0);
    }
}

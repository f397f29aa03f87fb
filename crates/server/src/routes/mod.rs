//! HTTP and WebSocket routes.

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Combined router.
///
/// Routes:
/// - GET  /health - Health check
/// - POST /api/jobs - Submit a job
/// - GET  /api/jobs - Jobs that are queued or running
/// - GET  /api/jobs/{job_id} - Status of one job
/// - WS   /ws/job/{job_id} - Live progress of one job
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/api", jobs::router())
        .nest("/ws", ws::router())
        .merge(metrics::router())
        .with_state(state)
}

//! WebSocket endpoint for live job progress.
//!
//! - `WS /ws/job/{job_id}` -- one JSON text frame per progress event

use std::sync::Arc;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use autoinsights_types::JobId;

use crate::gateway::ConnectionGateway;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/job/{job_id}", get(ws_job_handler))
}

/// Upgrade unconditionally: unknown jobs are reported over the socket (close
/// code 4004) so clients can tell them apart from transport failures.
async fn ws_job_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let scheduler = state.scheduler.clone();
    let ping_interval = state.config.ping_interval;
    ws.on_upgrade(move |socket| async move {
        let mut gateway =
            ConnectionGateway::new(JobId::from(job_id), socket, scheduler, ping_interval);
        gateway.serve().await;
    })
}

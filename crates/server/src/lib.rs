// crates/server/src/lib.rs
//! Auto-Insights job server library.
//!
//! Accepts analysis/training job submissions over HTTP, runs them in the
//! background, and streams each job's progress to any number of WebSocket
//! viewers through the Connection Gateway.

pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod workloads;

pub use config::ServerConfig;
pub use error::*;
pub use gateway::{CloseReason, Connection, ConnectionGateway, GatewayState};
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;
pub use workloads::{SimulatedWorkload, Workload, WorkloadCatalog, WorkloadError};

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - Job API, progress WebSocket, health and metrics routes
/// - CORS (allows any origin; the dashboard is served from elsewhere)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn app() -> Router {
        create_app(AppState::new(ServerConfig::default()))
    }

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = get(app(), "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert!(json["timestamp"].is_string());
        assert_eq!(json["active_jobs"], 0);
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let allow_origin = response.headers().get("access-control-allow-origin");
        assert_eq!(allow_origin.unwrap(), "*");
    }

    #[tokio::test]
    async fn test_websocket_route_requires_upgrade() {
        // A plain GET on the progress endpoint is not a valid handshake.
        let (status, _) = get(app(), "/ws/job/abc").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_404_for_unknown_route() {
        let (status, _) = get(app(), "/api/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

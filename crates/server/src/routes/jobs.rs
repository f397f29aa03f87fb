//! Job submission and status endpoints.
//!
//! - `POST /api/jobs` - Submit a job; returns where to watch its progress
//! - `GET /api/jobs` - Jobs that are queued or running
//! - `GET /api/jobs/{job_id}` - Current (or final) state of one job

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use autoinsights_types::{JobId, JobSnapshot, JobStatus, SubmitJobRequest, SubmitJobResponse};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct JobListResponse {
    pub jobs: Vec<JobSnapshot>,
    pub total: usize,
}

/// POST /api/jobs
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let plan = state.workloads.plan(&request.kind, &request.params)?;
    let job_id = state.scheduler.submit(&request.kind, plan, request.params);

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            websocket_url: state.config.websocket_url(&job_id),
            job_id,
            kind: request.kind,
            status: JobStatus::Queued,
        }),
    ))
}

/// GET /api/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<JobListResponse> {
    let jobs = state.scheduler.active_jobs();
    Json(JobListResponse {
        total: jobs.len(),
        jobs,
    })
}

/// GET /api/jobs/{job_id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let id = JobId::from(job_id);
    state
        .scheduler
        .status(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::JobNotFound(id.to_string()))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{job_id}", get(get_job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::{body::Body, http::Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::ServerConfig;

    fn test_state() -> Arc<AppState> {
        AppState::new(ServerConfig {
            stage_delay: Duration::ZERO,
            ..ServerConfig::default()
        })
    }

    async fn send(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = crate::create_app(state).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_created_with_websocket_url() {
        let state = test_state();
        let (status, body) = send(state, post(r#"{"kind":"eda","params":{}}"#)).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "queued");
        assert_eq!(body["kind"], "eda");
        let job_id = body["job_id"].as_str().unwrap();
        assert_eq!(
            body["websocket_url"],
            format!("ws://localhost:8000/ws/job/{job_id}")
        );
    }

    #[tokio::test]
    async fn test_submit_unknown_kind_is_bad_request() {
        let (status, body) = send(test_state(), post(r#"{"kind":"forecast"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Bad request");
        assert!(body["details"].as_str().unwrap().contains("forecast"));
    }

    #[tokio::test]
    async fn test_submit_automl_without_target_is_bad_request() {
        let (status, body) = send(test_state(), post(r#"{"kind":"automl","params":{}}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"].as_str().unwrap().contains("target_column"));
    }

    #[tokio::test]
    async fn test_submit_malformed_body_is_bad_request() {
        let (status, body) = send(test_state(), post("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Bad request");
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_404() {
        let (status, body) = send(test_state(), get("/api/jobs/does-not-exist")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Job not found");
        assert_eq!(body["details"], "Job ID: does-not-exist");
    }

    #[tokio::test]
    async fn test_submitted_job_runs_to_completion() {
        let state = test_state();
        let (_, body) = send(
            state.clone(),
            post(r#"{"kind":"preprocessing","params":{"dataset":"sales.csv"}}"#),
        )
        .await;
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let snapshot = loop {
            let (status, snapshot) = send(state.clone(), get(&format!("/api/jobs/{job_id}"))).await;
            assert_eq!(status, StatusCode::OK);
            if snapshot["status"] == "completed" {
                break snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        assert_eq!(snapshot["progress"], 100);
        assert_eq!(snapshot["kind"], "preprocessing");
        assert_eq!(
            snapshot["result"]["Applying transformations"]["simulated"],
            json!(true)
        );
        assert!(snapshot.get("error").is_none());
    }

    #[tokio::test]
    async fn test_list_shows_only_active_jobs() {
        let state = AppState::new(ServerConfig {
            stage_delay: Duration::from_secs(60),
            ..ServerConfig::default()
        });
        send(state.clone(), post(r#"{"kind":"eda"}"#)).await;
        send(state.clone(), post(r#"{"kind":"eda"}"#)).await;

        let (status, body) = send(state, get("/api/jobs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["jobs"][0]["kind"], "eda");
    }
}

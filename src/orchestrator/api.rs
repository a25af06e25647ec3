//! External HTTP ingress: job submission and status polling.
//!
//! This is the only surface the outside world (the browser UI, via its own
//! auth/CORS edge) talks to directly. Everything else — queueing, the
//! orchestrator run, worker fan-out — happens off this request path; `POST
//! /jobs` only creates a row and enqueues a message.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::job::{JobKind, JobStore, RequestPayload};
use crate::queue::JobQueue;

/// Shared state for the external API.
#[derive(Clone)]
pub struct ApiState {
    pub job_store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
}

/// Builds the external-facing router: job submission and status polling.
/// Authentication and rate limiting belong to the edge in front of this
/// service, not here (see spec §1's out-of-scope list); the permissive CORS
/// layer is only for the browser UI's direct polling and carries no
/// credentials.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/jobs", post(submit_job))
        .route("/jobs/{job_id}", get(get_job_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct SubmitJobRequest {
    user_ref: String,
    kind: JobKind,
    request_payload: RequestPayload,
}

#[derive(Debug, Serialize)]
struct SubmitJobResponse {
    job_id: Uuid,
}

async fn submit_job(
    State(state): State<ApiState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), StatusCode> {
    let job = state
        .job_store
        .create_job(&req.user_ref, req.kind, req.request_payload)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to create job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    state.queue.enqueue(job.id).await.map_err(|e| {
        tracing::error!(job_id = %job.id, error = %e, "failed to enqueue job");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id: job.id })))
}

#[derive(Debug, Serialize)]
struct JobStatusResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    charts: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retirement: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<serde_json::Value>,
}

async fn get_job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let job = state.job_store.get_job(job_id).await.map_err(|e| {
        if matches!(e, crate::error::JobStoreError::NotFound { .. }) {
            StatusCode::NOT_FOUND
        } else {
            tracing::error!(job_id = %job_id, error = %e, "failed to load job");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;

    let summary = job
        .summary_payload
        .map(|s| serde_json::to_value(s).unwrap_or(serde_json::Value::Null));

    Ok(Json(JobStatusResponse {
        status: job.status.as_str().to_string(),
        error: job.error,
        report: job.report_payload,
        charts: job.charts_payload.filter(|v| {
            v.as_object().is_some_and(|o| !o.is_empty())
        }),
        retirement: job.retirement_payload,
        summary,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::job::{Job, JobStatus, SlotValue};
    use crate::portfolio::PortfolioSnapshot;
    use crate::queue::InMemoryJobQueue;

    use super::*;

    struct StubJobStore {
        job: StdMutex<Option<Job>>,
    }

    fn pending_job(id: Uuid) -> Job {
        Job {
            id,
            user_ref: "user-1".to_string(),
            kind: JobKind::PortfolioAnalysis,
            status: JobStatus::Pending,
            request_payload: RequestPayload {
                portfolio: PortfolioSnapshot::empty(),
            },
            report_payload: None,
            charts_payload: None,
            retirement_payload: None,
            summary_payload: None,
            error: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[async_trait]
    impl JobStore for StubJobStore {
        async fn create_job(
            &self,
            user_ref: &str,
            kind: JobKind,
            request: RequestPayload,
        ) -> Result<Job, crate::error::JobStoreError> {
            let mut job = pending_job(Uuid::new_v4());
            job.user_ref = user_ref.to_string();
            job.kind = kind;
            job.request_payload = request;
            *self.job.lock().unwrap() = Some(job.clone());
            Ok(job)
        }

        async fn get_job(&self, id: Uuid) -> Result<Job, crate::error::JobStoreError> {
            self.job
                .lock()
                .unwrap()
                .clone()
                .filter(|j| j.id == id)
                .ok_or(crate::error::JobStoreError::NotFound { id })
        }

        async fn update_status(
            &self,
            _id: Uuid,
            _next: JobStatus,
            _error: Option<&str>,
        ) -> Result<(), crate::error::JobStoreError> {
            Ok(())
        }

        async fn set_slot(
            &self,
            _id: Uuid,
            _slot: SlotValue,
        ) -> Result<(), crate::error::JobStoreError> {
            Ok(())
        }
    }

    fn test_state() -> ApiState {
        ApiState {
            job_store: Arc::new(StubJobStore {
                job: StdMutex::new(None),
            }),
            queue: Arc::new(InMemoryJobQueue::new()),
        }
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let router = router(test_state());
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submitting_a_job_returns_202_with_a_job_id() {
        let router = router(test_state());
        let body = serde_json::json!({
            "user_ref": "user-1",
            "kind": "portfolio_analysis",
            "request_payload": { "portfolio": PortfolioSnapshot::empty() },
        });
        let req = Request::builder()
            .method("POST")
            .uri("/jobs")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn polling_an_unknown_job_returns_404() {
        let router = router(test_state());
        let req = Request::builder()
            .uri(format!("/jobs/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn polling_a_pending_job_omits_empty_slots() {
        let state = test_state();
        let job_id = {
            let job = state
                .job_store
                .create_job(
                    "user-1",
                    JobKind::PortfolioAnalysis,
                    RequestPayload {
                        portfolio: PortfolioSnapshot::empty(),
                    },
                )
                .await
                .unwrap();
            job.id
        };

        let router = router(state);
        let req = Request::builder()
            .uri(format!("/jobs/{job_id}"))
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "pending");
        assert!(value.get("report").is_none());
        assert!(value.get("charts").is_none());
    }
}

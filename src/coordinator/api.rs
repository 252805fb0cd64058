//! REST API handlers for the Coordinator server
//!
//! Hosts, submitters and peer coordinators all talk to the same router. Every
//! route sits behind the shared-token gate when a token is configured.

use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::metrics;
use crate::models::{
    CompleteJobRequest, EnqueueJobRequest, HeartbeatRequest, HostRecord, JobRecord,
    RegisterHostRequest, Snapshot,
};

use super::error::CoordinatorError;
use super::peer::{REPLICATE_PATH, STATE_PATH, TOKEN_HEADER};
use super::server::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HostResponse {
    pub host: HostRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub job: JobRecord,
}

/// Claim result; `job` is `null` when nothing was leased
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub job: Option<JobRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicateResponse {
    pub changed: bool,
    pub node_id: String,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        // Operational endpoints
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        // Replication endpoints
        .route(STATE_PATH, get(get_state))
        .route(REPLICATE_PATH, post(replicate_snapshot))
        // Host endpoints
        .route("/v1/hosts/register", post(register_host))
        .route("/v1/hosts/{id}/heartbeat", post(heartbeat))
        .route("/v1/hosts/{id}/claim", post(claim_job))
        // Job endpoints
        .route("/v1/jobs", post(enqueue_job))
        .route("/v1/jobs/{id}/complete", post(complete_job))
        .route_layer(middleware::from_fn(track_requests))
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ============================================================================
// Middleware
// ============================================================================

/// Reject requests without the configured shared token
async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.config.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    if provided != Some(expected) {
        tracing::debug!(path = %request.uri().path(), "Rejected request with missing or bad token");
        return (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new("unauthorized"))).into_response();
    }

    next.run(request).await
}

/// Record per-endpoint request metrics
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Error Mapping
// ============================================================================

/// HTTP status for a coordinator error
pub fn status_for(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::Validation(_) => StatusCode::BAD_REQUEST,
        CoordinatorError::UnknownHost(_) | CoordinatorError::UnknownJob(_) => StatusCode::NOT_FOUND,
        CoordinatorError::NotAssigned { .. } | CoordinatorError::NotLeased { .. } => {
            StatusCode::CONFLICT
        }
        CoordinatorError::ReplicationQuorumNotMet { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CoordinatorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: CoordinatorError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::warn!(error = %err, status = status.as_u16(), "Request failed");
    }
    (status, Json(ErrorResponse::new(err.to_string()))).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

// ============================================================================
// Operational Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.coordinator.node_id().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

/// Prometheus exposition endpoint
async fn metrics_text() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

// ============================================================================
// Replication Handlers
// ============================================================================

/// Full snapshot of this node
async fn get_state(State(state): State<AppState>) -> Response {
    ok(state.coordinator.snapshot())
}

/// Merge a snapshot pushed by a peer; malformed bodies are ignored
async fn replicate_snapshot(State(state): State<AppState>, body: Bytes) -> Response {
    let snapshot = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => Snapshot::from_value_lenient(&value),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring undecodable replication body");
            Snapshot::default()
        }
    };

    match state.coordinator.merge_snapshot(&snapshot) {
        Ok(outcome) => ok(ReplicateResponse {
            changed: outcome.changed,
            node_id: state.coordinator.node_id().to_string(),
        }),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Host Handlers
// ============================================================================

/// Register (or re-register) a host
async fn register_host(
    State(state): State<AppState>,
    payload: Result<Json<RegisterHostRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    match state.coordinator.register_host(request).await {
        Ok(host) => ok(HostResponse { host }),
        Err(e) => error_response(e),
    }
}

/// Heartbeat; the body is optional
async fn heartbeat(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    body: Bytes,
) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        HeartbeatRequest::default()
    } else {
        match serde_json::from_slice::<HeartbeatRequest>(&body) {
            Ok(request) => request,
            Err(e) => return bad_request(format!("invalid heartbeat body: {e}")),
        }
    };

    match state
        .coordinator
        .heartbeat(&host_id, request.active_leases)
        .await
    {
        Ok(host) => ok(HostResponse { host }),
        Err(e) => error_response(e),
    }
}

/// Lease the next matching job to a host
async fn claim_job(State(state): State<AppState>, Path(host_id): Path<String>) -> Response {
    match state.coordinator.claim_job(&host_id).await {
        Ok(job) => ok(ClaimResponse { job }),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Job Handlers
// ============================================================================

/// Submit a job
async fn enqueue_job(
    State(state): State<AppState>,
    payload: Result<Json<EnqueueJobRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    match state.coordinator.enqueue_job(request).await {
        Ok(job) => ok(JobResponse { job }),
        Err(e) => error_response(e),
    }
}

/// Report a job outcome
async fn complete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    payload: Result<Json<CompleteJobRequest>, JsonRejection>,
) -> Response {
    let Json(report) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    match state.coordinator.complete_job(&job_id, report).await {
        Ok(job) => ok(JobResponse { job }),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert!(response.data.is_some());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_error_response() {
        let response = ErrorResponse::new("test error");
        assert!(!response.success);
        assert_eq!(response.error, "test error");
    }

    #[test]
    fn test_error_body_decodes_as_api_response() {
        let json = serde_json::to_string(&ErrorResponse::new("unknown host: h1")).unwrap();
        let decoded: ApiResponse<HostResponse> = serde_json::from_str(&json).unwrap();
        assert!(!decoded.success);
        assert!(decoded.data.is_none());
        assert_eq!(decoded.error.as_deref(), Some("unknown host: h1"));
    }

    fn decode_envelope<R: serde::de::DeserializeOwned>(body: &str) -> ApiResponse<R> {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_envelope_decodes_without_data() {
        let decoded: ApiResponse<ReplicateResponse> =
            decode_envelope(r#"{"success":false,"error":"unknown job: j1"}"#);
        assert!(!decoded.success);
        assert!(decoded.data.is_none());

        let decoded: ApiResponse<ReplicateResponse> =
            decode_envelope(r#"{"success":true,"data":{"changed":true,"nodeId":"n1"}}"#);
        let data = decoded.data.unwrap();
        assert!(data.changed);
        assert_eq!(data.node_id, "n1");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&CoordinatorError::validation("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&CoordinatorError::UnknownJob("j".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&CoordinatorError::NotLeased {
                job_id: "j".into(),
                status: "queued".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&CoordinatorError::ReplicationQuorumNotMet {
                required: 1,
                acked: 0
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&CoordinatorError::Storage(StorageError::Io(
                std::io::Error::other("disk")
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

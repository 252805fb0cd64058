//! Coordinator client for hosts and submitters
//!
//! This module provides a client for host agents and the CLI to communicate
//! with a coordinator server.

use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::models::{
    CompleteJobRequest, EnqueueJobRequest, HeartbeatRequest, HostRecord, JobRecord,
    RegisterHostRequest, Snapshot,
};

use super::api::{ApiResponse, ClaimResponse, HealthResponse, HostResponse, JobResponse};
use super::peer::{STATE_PATH, TOKEN_HEADER};

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the coordinator client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator server URL
    pub coordinator_url: String,

    /// Shared token sent on every request
    pub token: Option<String>,

    /// Request timeout
    pub timeout: Duration,

    /// Retry count for failed requests
    pub retry_count: u32,

    /// Retry delay
    pub retry_delay: Duration,
}

impl ClientConfig {
    /// Create a new client config
    pub fn new(coordinator_url: impl Into<String>) -> Self {
        let url: String = coordinator_url.into();
        Self {
            coordinator_url: url.trim().trim_end_matches('/').to_string(),
            token: None,
            timeout: Duration::from_secs(10),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Set the shared token
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry count
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

// ============================================================================
// Coordinator Client
// ============================================================================

/// Client for communicating with the Coordinator server
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    config: ClientConfig,
    http_client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Register (or re-register) a host
    pub async fn register(&self, request: &RegisterHostRequest) -> Result<HostRecord, ClientError> {
        let response: HostResponse = self.post("/v1/hosts/register", request).await?;
        Ok(response.host)
    }

    /// Send a heartbeat with the host's local in-flight count
    pub async fn heartbeat(
        &self,
        host_id: &str,
        active_leases: Option<i64>,
    ) -> Result<HostRecord, ClientError> {
        let path = format!("/v1/hosts/{}/heartbeat", encode_segment(host_id));
        let response: HostResponse = self
            .post(&path, &HeartbeatRequest { active_leases })
            .await?;
        Ok(response.host)
    }

    /// Ask for the next matching job; `None` when nothing is claimable
    pub async fn claim(&self, host_id: &str) -> Result<Option<JobRecord>, ClientError> {
        let path = format!("/v1/hosts/{}/claim", encode_segment(host_id));
        let response: ClaimResponse = self.post(&path, &serde_json::json!({})).await?;
        Ok(response.job)
    }

    /// Report a job outcome
    pub async fn complete(
        &self,
        job_id: &str,
        report: &CompleteJobRequest,
    ) -> Result<JobRecord, ClientError> {
        let path = format!("/v1/jobs/{}/complete", encode_segment(job_id));
        let response: JobResponse = self.post(&path, report).await?;
        Ok(response.job)
    }

    /// Submit a job
    pub async fn enqueue(&self, request: &EnqueueJobRequest) -> Result<JobRecord, ClientError> {
        let response: JobResponse = self.post("/v1/jobs", request).await?;
        Ok(response.job)
    }

    /// Fetch the full coordinator snapshot
    pub async fn state(&self) -> Result<Snapshot, ClientError> {
        self.get(STATE_PATH).await
    }

    /// Check coordinator health
    pub async fn health_check(&self) -> Result<HealthStatus, ClientError> {
        let health: HealthResponse = self.get("/health").await?;
        Ok(HealthStatus {
            healthy: health.status == "healthy",
            node_id: health.node_id,
            version: health.version,
            uptime_secs: health.uptime_secs,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.coordinator_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        let url = self.url(path);
        self.with_retry(|| self.authorize(self.http_client.get(&url)))
            .await
    }

    async fn post<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, ClientError> {
        let url = self.url(path);
        self.with_retry(|| self.authorize(self.http_client.post(&url).json(body)))
            .await
    }

    // Internal: send with retry on transient failures
    async fn with_retry<R, F>(&self, build: F) -> Result<R, ClientError>
    where
        R: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match send_once(build()).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() => {
                    tracing::debug!(attempt, error = %e, "Coordinator request failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::NetworkError("Unknown error".to_string())))
    }
}

async fn send_once<R: DeserializeOwned>(request: RequestBuilder) -> Result<R, ClientError> {
    let response = request
        .send()
        .await
        .map_err(|e| ClientError::NetworkError(e.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ClientError::NetworkError(e.to_string()))?;

    if !status.is_success() {
        let message = serde_json::from_str::<ApiResponse<serde_json::Value>>(&text)
            .ok()
            .and_then(|body| body.error)
            .unwrap_or(text);
        return Err(ClientError::HttpError {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: ApiResponse<R> =
        serde_json::from_str(&text).map_err(|e| ClientError::ParseError(e.to_string()))?;

    match envelope {
        ApiResponse {
            success: true,
            data: Some(data),
            ..
        } => Ok(data),
        ApiResponse { error, .. } => Err(ClientError::InvalidResponse(
            error.unwrap_or_else(|| "missing response data".to_string()),
        )),
    }
}

/// Percent-encode an id used as a path segment
fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

// ============================================================================
// Response Types
// ============================================================================

/// Health status from coordinator
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub node_id: String,
    pub version: String,
    pub uptime_secs: u64,
}

// ============================================================================
// Client Errors
// ============================================================================

/// Client errors
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Initialization error
    InitError(String),

    /// Network error
    NetworkError(String),

    /// HTTP error
    HttpError { status: u16, message: String },

    /// Parse error
    ParseError(String),

    /// Invalid response
    InvalidResponse(String),
}

impl ClientError {
    /// Whether the request may succeed if sent again.
    ///
    /// A 503 means the coordinator applied the change but missed quorum, so
    /// resending would apply it twice.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError(_) => true,
            Self::HttpError { status, .. } => *status >= 500 && *status != 503,
            _ => false,
        }
    }

    /// HTTP status, if the coordinator answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::NetworkError(msg) => write!(f, "Network error: {msg}"),
            Self::HttpError { status, message } => {
                write!(f, "HTTP error ({status}): {message}")
            }
            Self::ParseError(msg) => write!(f, "Parse error: {msg}"),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

// ============================================================================
// Tests
// ============================================================================

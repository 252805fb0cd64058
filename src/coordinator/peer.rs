//! Outbound transport to peer coordinators
//!
//! Peers exchange full snapshots over the same HTTP API hosts use:
//! `POST /v1/replicate/snapshot` to push, `GET /v1/state` to pull.

use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::models::Snapshot;

use super::api::ApiResponse;

/// Header carrying the shared cluster token
pub const TOKEN_HEADER: &str = "x-skyclaw-token";

/// Path peers push snapshots to
pub const REPLICATE_PATH: &str = "/v1/replicate/snapshot";

/// Path peers pull snapshots from
pub const STATE_PATH: &str = "/v1/state";

// ============================================================================
// Transport
// ============================================================================

/// Snapshot exchange with a single peer
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Deliver a snapshot; `Ok` counts as an acknowledgement
    async fn push_snapshot(&self, peer: &str, snapshot: &Snapshot) -> Result<(), PeerError>;

    /// Fetch the peer's current snapshot
    async fn fetch_snapshot(&self, peer: &str) -> Result<Snapshot, PeerError>;
}

/// HTTP peer transport
#[derive(Debug, Clone)]
pub struct HttpPeerTransport {
    client: Client,
    auth_token: Option<String>,
}

impl HttpPeerTransport {
    pub fn new(auth_token: Option<String>, timeout: Duration) -> Result<Self, PeerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PeerError::Init(e.to_string()))?;

        Ok(Self { client, auth_token })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn push_snapshot(&self, peer: &str, snapshot: &Snapshot) -> Result<(), PeerError> {
        let url = format!("{peer}{REPLICATE_PATH}");
        let response = self
            .authorize(self.client.post(&url).json(snapshot))
            .send()
            .await
            .map_err(|e| PeerError::Network {
                peer: peer.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(PeerError::Rejected {
                peer: peer.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn fetch_snapshot(&self, peer: &str) -> Result<Snapshot, PeerError> {
        let url = format!("{peer}{STATE_PATH}");
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| PeerError::Network {
                peer: peer.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(PeerError::Rejected {
                peer: peer.to_string(),
                status: response.status().as_u16(),
            });
        }

        let envelope: ApiResponse<serde_json::Value> =
            response
                .json()
                .await
                .map_err(|e| PeerError::InvalidResponse {
                    peer: peer.to_string(),
                    message: e.to_string(),
                })?;

        Ok(envelope
            .data
            .map(|data| Snapshot::from_value_lenient(&data))
            .unwrap_or_default())
    }
}

// ============================================================================
// Peer URL handling
// ============================================================================

/// Clean up configured peer URLs
///
/// Trims whitespace and trailing slashes, drops blanks, unparseable URLs and
/// duplicates, and removes the node's own loopback addresses on `own_port`.
pub fn normalize_peer_urls<I, S>(urls: I, own_port: u16) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let own = [
        format!("http://127.0.0.1:{own_port}"),
        format!("http://localhost:{own_port}"),
        format!("http://0.0.0.0:{own_port}"),
    ];

    let mut peers: Vec<String> = Vec::new();
    for raw in urls {
        let url = raw.as_ref().trim().trim_end_matches('/');
        if url.is_empty() || own.iter().any(|o| o == url) {
            continue;
        }
        if let Err(e) = Url::parse(url) {
            tracing::warn!(peer = url, error = %e, "Ignoring invalid peer URL");
            continue;
        }
        if !peers.iter().any(|p| p == url) {
            peers.push(url.to_string());
        }
    }
    peers
}

// ============================================================================
// Error Types
// ============================================================================

/// Peer transport errors
#[derive(Debug, Clone)]
pub enum PeerError {
    /// HTTP client could not be built
    Init(String),

    /// Connection or transport failure
    Network { peer: String, message: String },

    /// Peer answered with a non-success status
    Rejected { peer: String, status: u16 },

    /// Peer answered with an undecodable body
    InvalidResponse { peer: String, message: String },

    /// Peer did not answer within the deadline
    Timeout { peer: String, after: Duration },
}

impl PeerError {
    pub fn peer(&self) -> Option<&str> {
        match self {
            Self::Init(_) => None,
            Self::Network { peer, .. }
            | Self::Rejected { peer, .. }
            | Self::InvalidResponse { peer, .. }
            | Self::Timeout { peer, .. } => Some(peer),
        }
    }
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(msg) => write!(f, "Peer transport init error: {msg}"),
            Self::Network { peer, message } => write!(f, "Peer {peer} unreachable: {message}"),
            Self::Rejected { peer, status } => write!(f, "Peer {peer} answered HTTP {status}"),
            Self::InvalidResponse { peer, message } => {
                write!(f, "Peer {peer} sent an invalid response: {message}")
            }
            Self::Timeout { peer, after } => {
                write!(f, "Peer {peer} timed out after {}ms", after.as_millis())
            }
        }
    }
}

impl std::error::Error for PeerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_peer_urls() {
        let peers = normalize_peer_urls(
            [
                " http://10.0.0.2:8787/ ",
                "",
                "http://10.0.0.2:8787",
                "http://127.0.0.1:8787",
                "http://localhost:8787/",
                "http://127.0.0.1:9000",
                "not a url",
            ],
            8787,
        );

        assert_eq!(peers, vec!["http://10.0.0.2:8787", "http://127.0.0.1:9000"]);
    }

    #[test]
    fn test_peer_error_display() {
        let err = PeerError::Rejected {
            peer: "http://p1".into(),
            status: 401,
        };
        assert_eq!(err.to_string(), "Peer http://p1 answered HTTP 401");
        assert_eq!(err.peer(), Some("http://p1"));
    }
}

//! Host agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::runner::ExecutionConfig;

/// Default coordinator URL for a host on the same machine
pub const DEFAULT_COORDINATOR_URL: &str = "http://127.0.0.1:8787";

/// Configuration for a host agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Coordinator base URL
    pub coordinator_url: String,

    /// Shared token sent to the coordinator
    pub token: Option<String>,

    /// Human readable host name
    pub host_name: String,

    /// Stable host id; the coordinator generates one when unset
    pub host_id: Option<String>,

    /// Capability tags offered by this host
    pub capabilities: Vec<String>,

    /// Concurrent jobs this host runs
    pub max_parallel: u32,

    /// Delay between empty claims in milliseconds
    pub poll_interval_ms: u64,

    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Coordinator request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Process execution limits
    pub execution: ExecutionConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            coordinator_url: DEFAULT_COORDINATOR_URL.to_string(),
            token: None,
            host_name: format!("skyclaw-{}", std::process::id()),
            host_id: None,
            capabilities: vec!["shell".to_string(), "automaton".to_string()],
            max_parallel: 1,
            poll_interval_ms: 2_000,
            heartbeat_interval_ms: 5_000,
            request_timeout_ms: 10_000,
            execution: ExecutionConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.coordinator_url.trim().is_empty() {
            return Err("coordinator_url must not be empty".to_string());
        }
        url::Url::parse(self.coordinator_url.trim())
            .map_err(|e| format!("invalid coordinator_url '{}': {e}", self.coordinator_url))?;

        if self.host_name.trim().is_empty() {
            return Err("host_name must not be empty".to_string());
        }
        if self.max_parallel == 0 {
            return Err("max_parallel must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 || self.heartbeat_interval_ms == 0 {
            return Err("poll and heartbeat intervals must be non-zero".to_string());
        }
        self.execution.validate()
    }
}

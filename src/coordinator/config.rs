//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use super::replication::normalize_min_replicas;

/// Default coordinator port
pub const DEFAULT_PORT: u16 = 8787;

fn default_bind_address() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
}

/// Configuration for the Coordinator server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Shared token required on every request (optional)
    pub auth_token: Option<String>,

    /// Lease length in milliseconds
    pub lease_ms: u64,

    /// Expired-lease sweep interval in milliseconds
    pub sweep_interval_ms: u64,

    /// SQLite database path; in-memory state when unset
    pub db_path: Option<PathBuf>,

    /// Node identifier reported to peers; generated when unset
    pub node_id: Option<String>,

    /// Peer coordinator base URLs
    pub peer_urls: Vec<String>,

    /// Anti-entropy pull interval in milliseconds
    pub peer_sync_interval_ms: u64,

    /// Per-peer request deadline in milliseconds
    pub peer_timeout_ms: u64,

    /// Minimum replica count including this node (unset means 100)
    pub min_replicas: Option<usize>,

    /// Enable request logging
    pub enable_request_logging: bool,

    /// Maximum accepted request body size in bytes
    pub max_body_bytes: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            auth_token: None,
            lease_ms: 60_000,
            sweep_interval_ms: 1_000,
            db_path: None,
            node_id: None,
            peer_urls: Vec::new(),
            peer_sync_interval_ms: 3_000,
            peer_timeout_ms: 5_000,
            min_replicas: None,
            enable_request_logging: true,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn peer_sync_interval(&self) -> Duration {
        Duration::from_millis(self.peer_sync_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    /// Effective minimum replica count
    pub fn effective_min_replicas(&self) -> usize {
        normalize_min_replicas(self.min_replicas)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lease_ms".to_string(),
                reason: "Lease must be at least 1ms".to_string(),
            });
        }

        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval_ms".to_string(),
                reason: "Sweep interval must be non-zero".to_string(),
            });
        }

        if self.peer_sync_interval_ms == 0 || self.peer_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "peer_sync_interval_ms".to_string(),
                reason: "Peer intervals and timeouts must be non-zero".to_string(),
            });
        }

        if self.auth_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "auth_token".to_string(),
                reason: "Token must not be blank".to_string(),
            });
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_body_bytes".to_string(),
                reason: "Must accept a non-empty body".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    bind_address: Option<SocketAddr>,
    auth_token: Option<String>,
    lease_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
    db_path: Option<PathBuf>,
    node_id: Option<String>,
    peer_urls: Vec<String>,
    peer_sync_interval_ms: Option<u64>,
    peer_timeout_ms: Option<u64>,
    min_replicas: Option<usize>,
    enable_request_logging: Option<bool>,
}

impl CoordinatorConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {}", addr),
        })?);
        Ok(self)
    }

    /// Set shared auth token
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set lease length
    pub fn lease_ms(mut self, ms: u64) -> Self {
        self.lease_ms = Some(ms);
        self
    }

    /// Set sweep interval
    pub fn sweep_interval_ms(mut self, ms: u64) -> Self {
        self.sweep_interval_ms = Some(ms);
        self
    }

    /// Set SQLite path
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Set node id
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Add a peer URL
    pub fn peer(mut self, url: impl Into<String>) -> Self {
        self.peer_urls.push(url.into());
        self
    }

    /// Set anti-entropy interval
    pub fn peer_sync_interval_ms(mut self, ms: u64) -> Self {
        self.peer_sync_interval_ms = Some(ms);
        self
    }

    /// Set per-peer deadline
    pub fn peer_timeout_ms(mut self, ms: u64) -> Self {
        self.peer_timeout_ms = Some(ms);
        self
    }

    /// Set minimum replica count
    pub fn min_replicas(mut self, n: usize) -> Self {
        self.min_replicas = Some(n);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            auth_token: self.auth_token,
            lease_ms: self.lease_ms.unwrap_or(defaults.lease_ms),
            sweep_interval_ms: self.sweep_interval_ms.unwrap_or(defaults.sweep_interval_ms),
            db_path: self.db_path,
            node_id: self.node_id,
            peer_urls: self.peer_urls,
            peer_sync_interval_ms: self
                .peer_sync_interval_ms
                .unwrap_or(defaults.peer_sync_interval_ms),
            peer_timeout_ms: self.peer_timeout_ms.unwrap_or(defaults.peer_timeout_ms),
            min_replicas: self.min_replicas,
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
            max_body_bytes: defaults.max_body_bytes,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address.port(), 8787);
        assert_eq!(config.lease_duration(), Duration::from_secs(60));
        assert_eq!(config.effective_min_replicas(), 100);
    }

    #[test]
    fn test_config_builder() {
        let config = CoordinatorConfig::builder()
            .lease_ms(10)
            .peer("http://10.0.0.2:8787")
            .peer("http://10.0.0.3:8787")
            .min_replicas(3)
            .auth_token("secret")
            .build()
            .unwrap();

        assert_eq!(config.lease_ms, 10);
        assert_eq!(config.peer_urls.len(), 2);
        assert_eq!(config.effective_min_replicas(), 3);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_config_validation_fails() {
        assert!(CoordinatorConfig::builder().lease_ms(0).build().is_err());
        assert!(CoordinatorConfig::builder().auth_token("  ").build().is_err());
    }

    #[test]
    fn test_config_builder_with_address() {
        let config = CoordinatorConfig::builder()
            .bind_address_str("127.0.0.1:9000")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.bind_address.port(), 9000);
        assert!(CoordinatorConfig::builder().bind_address_str("nope").is_err());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: CoordinatorConfig = toml::from_str(
            r#"
            lease_ms = 2000
            peer_urls = ["http://10.0.0.2:8787"]
            min_replicas = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.lease_ms, 2000);
        assert_eq!(config.sweep_interval_ms, 1000);
        assert_eq!(config.effective_min_replicas(), 2);
    }
}

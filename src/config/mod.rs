//! Configuration management for skyclaw
//!
//! This module handles loading configuration from a TOML file and from
//! `SKYCLAW_*` environment variables. Environment values override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::coordinator::config::CoordinatorConfig;
use crate::host::config::HostConfig;

/// Prefix shared by every environment variable
pub const ENV_PREFIX: &str = "SKYCLAW_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator node configuration
    pub coordinator: CoordinatorConfig,

    /// Host agent configuration
    pub host: HostConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// File (when given) first, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `SKYCLAW_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        // Coordinator
        let coordinator = &mut self.coordinator;
        if let Some(host) = get("COORDINATOR_HOST") {
            let ip: IpAddr = host
                .parse()
                .with_context(|| format!("Invalid SKYCLAW_COORDINATOR_HOST: {host}"))?;
            coordinator.bind_address = SocketAddr::new(ip, coordinator.bind_address.port());
        }
        if let Some(port) = parse_var::<u16>(&get, "COORDINATOR_PORT")? {
            coordinator.bind_address.set_port(port);
        }
        if let Some(token) = get("TOKEN") {
            coordinator.auth_token = Some(token.clone());
            self.host.token = Some(token);
        }
        if let Some(ms) = parse_var(&get, "LEASE_MS")? {
            coordinator.lease_ms = ms;
        }
        if let Some(ms) = parse_var(&get, "SWEEP_MS")? {
            coordinator.sweep_interval_ms = ms;
        }
        if let Some(path) = get("DB_PATH") {
            coordinator.db_path = Some(PathBuf::from(path));
        }
        if let Some(id) = get("NODE_ID") {
            coordinator.node_id = Some(id);
        }
        if let Some(peers) = get("PEERS") {
            coordinator.peer_urls = split_list(&peers);
        }
        if let Some(ms) = parse_var(&get, "PEER_SYNC_MS")? {
            coordinator.peer_sync_interval_ms = ms;
        }
        if let Some(ms) = parse_var(&get, "PEER_TIMEOUT_MS")? {
            coordinator.peer_timeout_ms = ms;
        }
        if let Some(n) = parse_var(&get, "MIN_REPLICAS")? {
            coordinator.min_replicas = Some(n);
        }

        // Host
        let host = &mut self.host;
        if let Some(url) = get("COORDINATOR_URL") {
            host.coordinator_url = url;
        }
        if let Some(name) = get("HOST_NAME") {
            host.host_name = name;
        }
        if let Some(id) = get("HOST_ID") {
            host.host_id = Some(id);
        }
        if let Some(caps) = get("CAPABILITIES") {
            host.capabilities = split_list(&caps);
        }
        if let Some(n) = parse_var(&get, "MAX_PARALLEL")? {
            host.max_parallel = n;
        }
        if let Some(ms) = parse_var(&get, "POLL_MS")? {
            host.poll_interval_ms = ms;
        }
        if let Some(ms) = parse_var(&get, "HEARTBEAT_MS")? {
            host.heartbeat_interval_ms = ms;
        }
        if let Some(commands) = get("ALLOWED_COMMANDS") {
            host.execution.allowed_commands = split_list(&commands);
        }
        if let Some(ms) = parse_var(&get, "TIMEOUT_MS")? {
            host.execution.default_timeout_ms = ms;
        }
        if let Some(bytes) = parse_var(&get, "MAX_OUTPUT_BYTES")? {
            host.execution.max_output_bytes = bytes;
        }
        if let Some(command) = get("AUTOMATON_COMMAND") {
            host.execution.automaton_command = command;
        }

        // Logging
        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = get("LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.coordinator
            .validate()
            .map_err(|e| anyhow::anyhow!("coordinator: {e}"))?;
        self.host
            .validate()
            .map_err(|e| anyhow::anyhow!("host: {e}"))?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {ENV_PREFIX}{name}={raw}: {e}")),
        None => Ok(None),
    }
}

/// Split a comma separated list, dropping blanks
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

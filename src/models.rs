//! Core data structures shared by the coordinator, the host agent and the wire
//!
//! Every record here serializes with camelCase field names so that snapshots
//! exchanged between coordinators and the JSON returned to hosts share one
//! format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::coordinator::capability::CapabilitySet;

// ============================================================================
// Hosts
// ============================================================================

/// A worker host known to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    /// Host identifier (immutable)
    pub id: String,

    /// Human readable host name
    pub name: String,

    /// Normalized capability tags offered by the host
    pub capabilities: CapabilitySet,

    /// Maximum number of concurrent leases (always >= 1)
    pub max_parallel: u32,

    /// Leases currently held by the host
    pub active_leases: u32,

    /// Last registration or heartbeat
    pub last_seen_at: DateTime<Utc>,

    /// First registration, preserved across re-registration
    pub registered_at: DateTime<Utc>,
}

impl HostRecord {
    /// Check whether the host has room for another lease
    pub fn has_capacity(&self) -> bool {
        self.active_leases < self.max_parallel
    }

    /// Seconds elapsed since the host was last seen
    pub fn seconds_since_seen(&self) -> i64 {
        (Utc::now() - self.last_seen_at).num_seconds()
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Leased,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed jobs never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability tags a job needs from its host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequirement {
    #[serde(default)]
    pub required_capabilities: CapabilitySet,
}

/// Run an arbitrary (allow-listed) command on the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellPayload {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Run the host's configured automaton binary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomatonRunPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automaton_dir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Work to execute, tagged by `kind` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JobPayload {
    #[serde(rename = "shell")]
    Shell(ShellPayload),

    #[serde(rename = "automaton-run")]
    AutomatonRun(AutomatonRunPayload),
}

impl JobPayload {
    /// Wire tag of the payload
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Shell(_) => "shell",
            Self::AutomatonRun(_) => "automaton-run",
        }
    }

    /// Per-job timeout requested by the submitter
    pub fn timeout(&self) -> Option<Duration> {
        let ms = match self {
            Self::Shell(shell) => shell.timeout_ms,
            Self::AutomatonRun(run) => run.timeout_ms,
        };
        ms.map(Duration::from_millis)
    }
}

/// Execution output recorded when a job finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A job tracked by the coordinator ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_host_id: Option<String>,
    #[serde(default)]
    pub requirement: JobRequirement,
    pub payload: JobPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    /// Create a freshly queued job
    pub fn new(
        id: String,
        payload: JobPayload,
        required_capabilities: CapabilitySet,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            status: JobStatus::Queued,
            attempts: 0,
            lease_expires_at: None,
            assigned_host_id: None,
            requirement: JobRequirement {
                required_capabilities,
            },
            payload,
            result: None,
            error: None,
        }
    }

    /// Check whether the job holds a lease that has run out at `now`
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Leased
            && self.lease_expires_at.is_some_and(|expires| expires <= now)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Full exported coordinator state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
}

impl Snapshot {
    /// Decode a snapshot from untrusted JSON, dropping anything malformed
    ///
    /// A body that is not an object yields an empty snapshot; individual host
    /// or job entries that fail to decode are skipped.
    pub fn from_value_lenient(value: &serde_json::Value) -> Self {
        Self {
            hosts: decode_entries(value.get("hosts")),
            jobs: decode_entries(value.get("jobs")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.jobs.is_empty()
    }

    pub fn find_host(&self, id: &str) -> Option<&HostRecord> {
        self.hosts.iter().find(|h| h.id == id)
    }

    pub fn find_job(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

fn decode_entries<T: for<'de> Deserialize<'de>>(value: Option<&serde_json::Value>) -> Vec<T> {
    let Some(serde_json::Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed snapshot entry");
                None
            }
        })
        .collect()
}

// ============================================================================
// Requests
// ============================================================================

/// Host registration (or re-registration) request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterHostRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<u32>,
}

impl RegisterHostRequest {
    pub fn new(name: impl Into<String>, capabilities: &[&str], max_parallel: u32) -> Self {
        Self {
            host_id: None,
            name: name.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            max_parallel: Some(max_parallel),
        }
    }

    /// Attach an explicit host id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.host_id = Some(id.into());
        self
    }

    /// Boundary validation: a host must have a name
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        Ok(())
    }
}

/// Heartbeat request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_leases: Option<i64>,
}

/// Requirement as submitted, before normalization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementInput {
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

/// Job submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueJobRequest {
    pub payload: JobPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<RequirementInput>,
}

impl EnqueueJobRequest {
    pub fn new(payload: JobPayload, required_capabilities: &[&str]) -> Self {
        Self {
            payload,
            requirement: Some(RequirementInput {
                required_capabilities: required_capabilities.iter().map(|c| c.to_string()).collect(),
            }),
        }
    }

    /// Boundary validation: shell jobs need a command
    pub fn validate(&self) -> Result<(), String> {
        match &self.payload {
            JobPayload::Shell(shell) if shell.command.trim().is_empty() => {
                Err("payload.command is required".to_string())
            }
            JobPayload::Shell(_) | JobPayload::AutomatonRun(_) => Ok(()),
        }
    }
}

/// Completion report sent by the host that holds the lease
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteJobRequest {
    pub host_id: String,
    pub success: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompleteJobRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.host_id.trim().is_empty() {
            return Err("hostId is required".to_string());
        }
        Ok(())
    }
}

/// Generate a prefixed random identifier such as `job-3f2a...`
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// Next logical timestamp for a record last stamped at `previous`
///
/// Always strictly later than `previous`, even when the wall clock is behind.
pub fn advance_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + chrono::Duration::milliseconds(1)
    }
}

//! Replication policy and last-writer-wins merge
//!
//! Pure functions only; the network side lives in [`super::sync`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::models::{HostRecord, JobRecord};

/// Minimum replica count when none is configured
///
/// High enough that a node without explicit replication settings refuses to
/// start with fewer than 99 peers. Standalone nodes must set 1.
pub const DEFAULT_MIN_REPLICAS: usize = 100;

/// Resolve the configured minimum replica count (unset → default, floor 1)
pub fn normalize_min_replicas(configured: Option<usize>) -> usize {
    configured.unwrap_or(DEFAULT_MIN_REPLICAS).max(1)
}

/// Peer acknowledgements needed for a write to count as replicated
pub fn required_peer_replications(min_replicas: usize) -> usize {
    min_replicas.saturating_sub(1)
}

/// Startup check that enough peers are configured to ever reach quorum
pub fn assert_peer_capacity(
    min_replicas: usize,
    peer_count: usize,
) -> Result<(), ReplicationPolicyError> {
    let required = required_peer_replications(min_replicas);
    if peer_count < required {
        return Err(ReplicationPolicyError::InsufficientPeers {
            min_replicas,
            required,
            configured: peer_count,
        });
    }
    Ok(())
}

/// Replication policy errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationPolicyError {
    InsufficientPeers {
        min_replicas: usize,
        required: usize,
        configured: usize,
    },
}

impl fmt::Display for ReplicationPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientPeers {
                min_replicas,
                required,
                configured,
            } => write!(
                f,
                "minReplicas={min_replicas} requires at least {required} peers, but {configured} configured"
            ),
        }
    }
}

impl std::error::Error for ReplicationPolicyError {}

// ============================================================================
// Merge
// ============================================================================

/// A record carrying its own logical timestamp
pub trait Versioned: Serialize {
    fn record_id(&self) -> &str;

    /// Logical timestamp compared during merge
    fn version(&self) -> DateTime<Utc>;
}

impl Versioned for HostRecord {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> DateTime<Utc> {
        self.last_seen_at
    }
}

impl Versioned for JobRecord {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Decide whether `incoming` replaces `local`
///
/// Newer timestamp wins. Equal timestamps with different content are settled by
/// comparing the serialized records, so every node converges on the same copy
/// regardless of the order snapshots arrive in.
pub fn should_adopt<T: Versioned>(local: Option<&T>, incoming: &T) -> bool {
    let Some(local) = local else {
        return true;
    };

    match incoming.version().cmp(&local.version()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => tie_break_key(incoming) > tie_break_key(local),
    }
}

fn tie_break_key<T: Serialize>(record: &T) -> String {
    serde_json::to_string(record).unwrap_or_default()
}

/// Collapse duplicate ids within one batch, keeping the winning copy of each
pub fn dedupe_newest<T: Versioned + Clone>(records: &[T]) -> Vec<T> {
    let mut winners: Vec<T> = Vec::with_capacity(records.len());
    for record in records {
        match winners
            .iter_mut()
            .find(|w| w.record_id() == record.record_id())
        {
            Some(existing) => {
                if should_adopt(Some(&*existing), record) {
                    *existing = record.clone();
                }
            }
            None => winners.push(record.clone()),
        }
    }
    winners
}

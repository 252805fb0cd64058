//! Host registry with concurrency accounting
//!
//! The registry is a plain owned map; it is only ever reached through
//! [`CoordinatorState`](super::state::CoordinatorState), which holds the lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::HostRecord;

// ============================================================================
// Host Registry
// ============================================================================

/// Registry of every host that ever registered
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: HashMap<String, HostRecord>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a host
    pub fn get(&self, id: &str) -> Option<&HostRecord> {
        self.hosts.get(id)
    }

    /// Insert or replace a host record
    pub fn upsert(&mut self, host: HostRecord) {
        self.hosts.insert(host.id.clone(), host);
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// All hosts ordered by registration time, then id
    pub fn sorted(&self) -> Vec<HostRecord> {
        let mut hosts: Vec<_> = self.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        hosts
    }

    /// Registry statistics; hosts silent for longer than `stale_after_secs` count as stale
    pub fn stats(&self, stale_after_secs: i64) -> RegistryStats {
        let mut stats = RegistryStats {
            total_hosts: self.hosts.len(),
            ..Default::default()
        };

        for host in self.hosts.values() {
            if !host.has_capacity() {
                stats.saturated += 1;
            }
            if host.seconds_since_seen() > stale_after_secs {
                stats.stale += 1;
            }
            stats.active_leases += u64::from(host.active_leases);
            stats.total_capacity += u64::from(host.max_parallel);
        }

        stats
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_hosts: usize,
    pub saturated: usize,
    pub stale: usize,
    pub active_leases: u64,
    pub total_capacity: u64,
}

impl RegistryStats {
    /// Share of fleet capacity currently leased, in percent
    pub fn utilization(&self) -> f64 {
        if self.total_capacity == 0 {
            0.0
        } else {
            (self.active_leases as f64 / self.total_capacity as f64) * 100.0
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

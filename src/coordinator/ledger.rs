//! Job ledger
//!
//! Jobs are never removed. Claim selection is a linear FIFO scan over queued
//! jobs; there is no priority ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{JobRecord, JobStatus};

use super::capability::{has_capabilities, CapabilitySet};

/// Every job the coordinator has accepted, keyed by id
#[derive(Debug, Default)]
pub struct JobLedger {
    jobs: HashMap<String, JobRecord>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    /// Insert or replace a job record
    pub fn upsert(&mut self, job: JobRecord) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Oldest queued job the given capabilities can run
    ///
    /// Ties on `created_at` are broken by id so selection is deterministic.
    pub fn next_claimable(&self, offered: &CapabilitySet) -> Option<&JobRecord> {
        self.jobs
            .values()
            .filter(|job| job.status == JobStatus::Queued)
            .filter(|job| has_capabilities(offered, &job.requirement.required_capabilities))
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
    }

    /// Copies of every leased job whose lease ran out at `now`
    pub fn expired_leases(&self, now: DateTime<Utc>) -> Vec<JobRecord> {
        self.jobs
            .values()
            .filter(|job| job.lease_expired(now))
            .cloned()
            .collect()
    }

    /// All jobs ordered by creation time, then id
    pub fn sorted(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<_> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs
    }

    pub fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats::default();
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Leased => stats.leased += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

/// Job counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub queued: usize,
    pub leased: usize,
    pub completed: usize,
    pub failed: usize,
}

impl LedgerStats {
    pub fn total(&self) -> usize {
        self.queued + self.leased + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::capability::normalize_capabilities;
    use crate::models::{JobPayload, ShellPayload};
    use chrono::Duration;

    fn job(id: &str, requires: &[&str], created_at: DateTime<Utc>) -> JobRecord {
        JobRecord::new(
            id.to_string(),
            JobPayload::Shell(ShellPayload {
                command: "true".to_string(),
                ..Default::default()
            }),
            normalize_capabilities(requires),
            created_at,
        )
    }

    #[test]
    fn test_next_claimable_is_fifo_among_eligible() {
        let base = Utc::now();
        let mut ledger = JobLedger::new();
        ledger.upsert(job("gpu-old", &["gpu"], base));
        ledger.upsert(job("shell-new", &["shell"], base + Duration::seconds(2)));
        ledger.upsert(job("shell-old", &["shell"], base + Duration::seconds(1)));

        let offered = normalize_capabilities(["shell"]);
        assert_eq!(ledger.next_claimable(&offered).unwrap().id, "shell-old");

        let none = normalize_capabilities(["automaton"]);
        assert!(ledger.next_claimable(&none).is_none());
    }

    #[test]
    fn test_next_claimable_skips_non_queued() {
        let mut ledger = JobLedger::new();
        let mut leased = job("leased", &[], Utc::now());
        leased.status = JobStatus::Leased;
        ledger.upsert(leased);

        assert!(ledger.next_claimable(&CapabilitySet::new()).is_none());
    }

    #[test]
    fn test_expired_leases_and_stats() {
        let now = Utc::now();
        let mut ledger = JobLedger::new();

        let mut expired = job("expired", &[], now);
        expired.status = JobStatus::Leased;
        expired.lease_expires_at = Some(now - Duration::milliseconds(5));
        ledger.upsert(expired);

        let mut live = job("live", &[], now);
        live.status = JobStatus::Leased;
        live.lease_expires_at = Some(now + Duration::seconds(30));
        ledger.upsert(live);

        ledger.upsert(job("queued", &[], now));

        let ids: Vec<_> = ledger.expired_leases(now).into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["expired"]);

        let stats = ledger.stats();
        assert_eq!(stats.leased, 2);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.total(), 3);
    }
}

//! Coordinator state engine
//!
//! Owns the host registry and the job ledger behind one lock. Every operation
//! runs to completion under that lock and never awaits; durable writes happen
//! before the in-memory state is touched, so a failed write leaves nothing
//! behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::models::{
    advance_timestamp, generate_id, CompleteJobRequest, EnqueueJobRequest, HostRecord,
    JobRecord, JobResult, JobStatus, RegisterHostRequest, Snapshot,
};
use crate::storage::{create_memory_store, ChangeSet, SharedCoordinatorStore};

use super::capability::normalize_capabilities;
use super::error::{CoordinatorError, CoordinatorResult};
use super::ledger::{JobLedger, LedgerStats};
use super::registry::{HostRegistry, RegistryStats};
use super::replication::{dedupe_newest, should_adopt};

/// Default lease length handed out by `claim_job`
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Hosts silent for longer than this are reported as stale
const STALE_HOST_SECS: i64 = 90;

/// Construction options
#[derive(Clone)]
pub struct StateOptions {
    pub lease_duration: Duration,
    pub store: SharedCoordinatorStore,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            store: create_memory_store(),
        }
    }
}

impl StateOptions {
    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_store(mut self, store: SharedCoordinatorStore) -> Self {
        self.store = store;
        self
    }
}

/// Result of merging a peer snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub changed: bool,
    pub hosts_adopted: usize,
    pub jobs_adopted: usize,
}

/// Combined registry and ledger statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStats {
    pub hosts: RegistryStats,
    pub jobs: LedgerStats,
}

#[derive(Debug, Default)]
struct Inner {
    registry: HostRegistry,
    ledger: JobLedger,
}

impl Inner {
    /// Apply records that are already durable
    fn apply(&mut self, changes: ChangeSet) {
        for host in changes.hosts {
            self.registry.upsert(host);
        }
        for job in changes.jobs {
            self.ledger.upsert(job);
        }
    }
}

/// The coordinator's authoritative in-memory state
pub struct CoordinatorState {
    inner: Mutex<Inner>,
    lease_duration: Duration,
    store: SharedCoordinatorStore,
}

impl CoordinatorState {
    /// Build the state, loading hosts and then jobs from the store
    pub fn new(options: StateOptions) -> CoordinatorResult<Self> {
        let mut inner = Inner::default();

        for host in options.store.load_hosts()? {
            inner.registry.upsert(host);
        }
        for job in options.store.load_jobs()? {
            inner.ledger.upsert(job);
        }

        if !inner.registry.is_empty() || !inner.ledger.is_empty() {
            tracing::info!(
                hosts = inner.registry.len(),
                jobs = inner.ledger.len(),
                "Restored coordinator state from store"
            );
        }

        Ok(Self {
            inner: Mutex::new(inner),
            lease_duration: options.lease_duration,
            store: options.store,
        })
    }

    /// Ephemeral state with default lease length
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            lease_duration: DEFAULT_LEASE_DURATION,
            store: create_memory_store(),
        }
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist, then apply
    fn commit(&self, inner: &mut Inner, changes: ChangeSet) -> CoordinatorResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.store.save_changes(&changes)?;
        inner.apply(changes);
        Ok(())
    }

    fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.lease_duration)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    // ========================================================================
    // Hosts
    // ========================================================================

    /// Register a host, or re-register an existing id
    ///
    /// Re-registration replaces name, capabilities and `max_parallel` but keeps
    /// `active_leases` and `registered_at`.
    pub fn register_host(&self, request: RegisterHostRequest) -> CoordinatorResult<HostRecord> {
        request.validate().map_err(CoordinatorError::Validation)?;

        let id = request
            .host_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| generate_id("host"));

        let mut inner = self.lock();
        let now = Utc::now();
        let existing = inner.registry.get(&id);

        let host = HostRecord {
            id: id.clone(),
            name: request.name.trim().to_string(),
            capabilities: normalize_capabilities(&request.capabilities),
            max_parallel: request.max_parallel.unwrap_or(1).max(1),
            active_leases: existing.map_or(0, |h| h.active_leases),
            last_seen_at: existing.map_or(now, |h| advance_timestamp(h.last_seen_at, now)),
            registered_at: existing.map_or(now, |h| h.registered_at),
        };
        let reregistered = existing.is_some();

        self.commit(&mut inner, ChangeSet::host(host.clone()))?;

        tracing::info!(
            host_id = %host.id,
            name = %host.name,
            capabilities = ?host.capabilities,
            max_parallel = host.max_parallel,
            reregistered,
            "Host registered"
        );
        Ok(host)
    }

    /// Record a heartbeat; a non-negative `active_leases` overwrites the tracked count
    pub fn heartbeat(
        &self,
        host_id: &str,
        active_leases: Option<i64>,
    ) -> CoordinatorResult<HostRecord> {
        let mut inner = self.lock();
        let mut host = inner
            .registry
            .get(host_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownHost(host_id.to_string()))?;

        host.last_seen_at = advance_timestamp(host.last_seen_at, Utc::now());

        if let Some(reported) = active_leases.filter(|n| *n >= 0) {
            let reported = u32::try_from(reported).unwrap_or(u32::MAX);
            if reported > host.max_parallel {
                tracing::warn!(
                    host_id,
                    reported,
                    max_parallel = host.max_parallel,
                    "Host reports more active leases than its limit"
                );
            }
            host.active_leases = reported;
        }

        self.commit(&mut inner, ChangeSet::host(host.clone()))?;
        tracing::debug!(host_id, active_leases = host.active_leases, "Heartbeat");
        Ok(host)
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Accept a job into the queue
    pub fn enqueue_job(&self, request: EnqueueJobRequest) -> CoordinatorResult<JobRecord> {
        request.validate().map_err(CoordinatorError::Validation)?;

        let required = normalize_capabilities(
            request
                .requirement
                .map(|r| r.required_capabilities)
                .unwrap_or_default(),
        );
        let job = JobRecord::new(generate_id("job"), request.payload, required, Utc::now());

        let mut inner = self.lock();
        self.commit(&mut inner, ChangeSet::job(job.clone()))?;

        tracing::info!(
            job_id = %job.id,
            kind = job.payload.kind(),
            requires = ?job.requirement.required_capabilities,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Lease the oldest matching queued job to `host_id`
    ///
    /// Returns `None` when the host is saturated or nothing it can run is queued.
    pub fn claim_job(&self, host_id: &str) -> CoordinatorResult<Option<JobRecord>> {
        let mut inner = self.lock();
        let now = Utc::now();
        self.sweep_locked(&mut inner, now)?;

        let mut host = inner
            .registry
            .get(host_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownHost(host_id.to_string()))?;

        if !host.has_capacity() {
            tracing::debug!(
                host_id,
                active_leases = host.active_leases,
                max_parallel = host.max_parallel,
                "Host saturated, nothing claimed"
            );
            return Ok(None);
        }

        let Some(mut job) = inner.ledger.next_claimable(&host.capabilities).cloned() else {
            return Ok(None);
        };

        job.status = JobStatus::Leased;
        job.attempts += 1;
        job.assigned_host_id = Some(host_id.to_string());
        job.updated_at = advance_timestamp(job.updated_at, now);
        job.lease_expires_at = Some(self.lease_deadline(now));
        host.active_leases += 1;
        host.last_seen_at = advance_timestamp(host.last_seen_at, now);

        self.commit(
            &mut inner,
            ChangeSet {
                hosts: vec![host],
                jobs: vec![job.clone()],
            },
        )?;

        tracing::info!(
            job_id = %job.id,
            host_id,
            attempt = job.attempts,
            "Job leased"
        );
        Ok(Some(job))
    }

    /// Record the outcome reported by the host holding the lease
    pub fn complete_job(
        &self,
        job_id: &str,
        report: CompleteJobRequest,
    ) -> CoordinatorResult<JobRecord> {
        report.validate().map_err(CoordinatorError::Validation)?;

        let mut inner = self.lock();
        let mut host = inner
            .registry
            .get(&report.host_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownHost(report.host_id.clone()))?;
        let mut job = inner
            .ledger
            .get(job_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownJob(job_id.to_string()))?;

        if job.assigned_host_id.as_deref() != Some(report.host_id.as_str()) {
            return Err(CoordinatorError::NotAssigned {
                job_id: job_id.to_string(),
                host_id: report.host_id,
            });
        }
        if job.status != JobStatus::Leased {
            return Err(CoordinatorError::NotLeased {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
            });
        }

        let now = advance_timestamp(job.updated_at, Utc::now());
        job.status = if report.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        job.updated_at = now;
        job.lease_expires_at = None;
        job.error = if report.success {
            None
        } else {
            Some(
                report
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| format!("job exited with code {}", report.exit_code)),
            )
        };
        job.result = Some(JobResult {
            finished_at: now,
            duration_ms: report.duration_ms,
            exit_code: report.exit_code,
            stdout: report.stdout,
            stderr: report.stderr,
        });
        host.active_leases = host.active_leases.saturating_sub(1);
        host.last_seen_at = advance_timestamp(host.last_seen_at, now);

        self.commit(
            &mut inner,
            ChangeSet {
                hosts: vec![host],
                jobs: vec![job.clone()],
            },
        )?;

        tracing::info!(
            job_id,
            host_id = ?job.assigned_host_id,
            status = %job.status,
            exit_code = job.result.as_ref().map(|r| r.exit_code),
            "Job finished"
        );
        Ok(job)
    }

    /// Return every expired lease to the queue; returns how many were reclaimed
    pub fn requeue_expired_leases(&self) -> CoordinatorResult<usize> {
        let mut inner = self.lock();
        self.sweep_locked(&mut inner, Utc::now())
    }

    fn sweep_locked(&self, inner: &mut Inner, now: DateTime<Utc>) -> CoordinatorResult<usize> {
        let expired = inner.ledger.expired_leases(now);
        if expired.is_empty() {
            return Ok(0);
        }

        let mut changes = ChangeSet::default();
        for mut job in expired {
            if let Some(host_id) = job.assigned_host_id.take() {
                if let Some(pos) = changes.hosts.iter().position(|h| h.id == host_id) {
                    let host = &mut changes.hosts[pos];
                    host.active_leases = host.active_leases.saturating_sub(1);
                } else if let Some(host) = inner.registry.get(&host_id) {
                    let mut host = host.clone();
                    host.active_leases = host.active_leases.saturating_sub(1);
                    // New version so peers adopt the lower count
                    host.last_seen_at = advance_timestamp(host.last_seen_at, now);
                    changes.hosts.push(host);
                }
                tracing::warn!(
                    job_id = %job.id,
                    host_id = %host_id,
                    attempts = job.attempts,
                    "Lease expired, job requeued"
                );
            }
            job.status = JobStatus::Queued;
            job.lease_expires_at = None;
            job.updated_at = advance_timestamp(job.updated_at, now);
            changes.jobs.push(job);
        }

        let reclaimed = changes.jobs.len();
        self.commit(inner, changes)?;
        crate::metrics::record_leases_reclaimed(reclaimed);
        Ok(reclaimed)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Export the full state (after a reclaim sweep), jobs ordered by creation
    pub fn snapshot(&self) -> Snapshot {
        let mut inner = self.lock();
        if let Err(e) = self.sweep_locked(&mut inner, Utc::now()) {
            tracing::warn!(error = %e, "Lease sweep failed while exporting snapshot");
        }
        Snapshot {
            hosts: inner.registry.sorted(),
            jobs: inner.ledger.sorted(),
        }
    }

    /// Last-writer-wins merge of a peer snapshot
    pub fn merge_snapshot(&self, incoming: &Snapshot) -> CoordinatorResult<MergeOutcome> {
        let mut inner = self.lock();

        let hosts: Vec<_> = dedupe_newest(&incoming.hosts)
            .into_iter()
            .filter(|host| should_adopt(inner.registry.get(&host.id), host))
            .collect();
        let jobs: Vec<_> = dedupe_newest(&incoming.jobs)
            .into_iter()
            .filter(|job| should_adopt(inner.ledger.get(&job.id), job))
            .collect();

        let outcome = MergeOutcome {
            changed: !hosts.is_empty() || !jobs.is_empty(),
            hosts_adopted: hosts.len(),
            jobs_adopted: jobs.len(),
        };

        self.commit(&mut inner, ChangeSet { hosts, jobs })?;

        if outcome.changed {
            tracing::debug!(
                hosts = outcome.hosts_adopted,
                jobs = outcome.jobs_adopted,
                "Merged peer snapshot"
            );
        }
        Ok(outcome)
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn host(&self, id: &str) -> Option<HostRecord> {
        self.lock().registry.get(id).cloned()
    }

    pub fn job(&self, id: &str) -> Option<JobRecord> {
        self.lock().ledger.get(id).cloned()
    }

    pub fn stats(&self) -> StateStats {
        let inner = self.lock();
        StateStats {
            hosts: inner.registry.stats(STALE_HOST_SECS),
            jobs: inner.ledger.stats(),
        }
    }
}

impl std::fmt::Debug for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorState")
            .field("lease_duration", &self.lease_duration)
            .finish_non_exhaustive()
    }
}

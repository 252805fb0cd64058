//! A coordinator node: local state plus quorum-gated replication
//!
//! Every mutating call applies locally first, then pushes the resulting
//! snapshot to peers. When too few peers acknowledge, the caller gets
//! [`CoordinatorError::ReplicationQuorumNotMet`] but the local change stays.

use std::sync::Arc;

use crate::metrics;
use crate::models::{
    CompleteJobRequest, EnqueueJobRequest, HostRecord, JobRecord, RegisterHostRequest, Snapshot,
};

use super::error::{CoordinatorError, CoordinatorResult};
use super::peer::PeerTransport;
use super::replication::{assert_peer_capacity, required_peer_replications, ReplicationPolicyError};
use super::state::{CoordinatorState, MergeOutcome, StateStats};
use super::sync::{PeerSynchronizer, ReplicationReport};

/// Coordinator node facade used by the transport layer
pub struct Coordinator {
    node_id: String,
    state: Arc<CoordinatorState>,
    sync: Arc<PeerSynchronizer>,
    required_acks: usize,
}

impl Coordinator {
    /// Build a node, refusing to start if the peer list can never reach quorum
    pub fn new(
        node_id: impl Into<String>,
        state: Arc<CoordinatorState>,
        sync: Arc<PeerSynchronizer>,
        min_replicas: usize,
    ) -> Result<Self, ReplicationPolicyError> {
        assert_peer_capacity(min_replicas, sync.peers().len())?;

        Ok(Self {
            node_id: node_id.into(),
            state,
            sync,
            required_acks: required_peer_replications(min_replicas),
        })
    }

    /// Single node without peers (`min_replicas = 1`)
    pub fn standalone(node_id: impl Into<String>, state: Arc<CoordinatorState>) -> Self {
        Self {
            node_id: node_id.into(),
            state,
            sync: Arc::new(PeerSynchronizer::new(Vec::new(), Arc::new(NoPeers))),
            required_acks: 0,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn state(&self) -> &Arc<CoordinatorState> {
        &self.state
    }

    pub fn synchronizer(&self) -> &Arc<PeerSynchronizer> {
        &self.sync
    }

    /// Peer acknowledgements each write waits for
    pub fn required_acks(&self) -> usize {
        self.required_acks
    }

    async fn replicate(&self) -> CoordinatorResult<ReplicationReport> {
        let report = self.sync.push_snapshot(self.state.snapshot()).await;

        if report.acked < self.required_acks {
            metrics::record_quorum_failure();
            tracing::warn!(
                node_id = %self.node_id,
                acked = report.acked,
                attempted = report.attempted,
                required = self.required_acks,
                "Replication quorum not met"
            );
            return Err(CoordinatorError::ReplicationQuorumNotMet {
                required: self.required_acks,
                acked: report.acked,
            });
        }
        Ok(report)
    }

    fn refresh_gauges(&self) {
        let stats = self.state.stats();
        metrics::set_registered_hosts(stats.hosts.total_hosts);
        metrics::set_jobs_by_status(&stats.jobs);
    }

    pub async fn register_host(&self, request: RegisterHostRequest) -> CoordinatorResult<HostRecord> {
        let host = self.state.register_host(request)?;
        self.refresh_gauges();
        self.replicate().await?;
        Ok(host)
    }

    pub async fn heartbeat(
        &self,
        host_id: &str,
        active_leases: Option<i64>,
    ) -> CoordinatorResult<HostRecord> {
        let host = self.state.heartbeat(host_id, active_leases)?;
        self.replicate().await?;
        Ok(host)
    }

    pub async fn enqueue_job(&self, request: EnqueueJobRequest) -> CoordinatorResult<JobRecord> {
        let job = self.state.enqueue_job(request)?;
        metrics::record_job_enqueued(job.payload.kind());
        self.refresh_gauges();
        self.replicate().await?;
        Ok(job)
    }

    /// Claim for `host_id`; an empty claim changes nothing and is not replicated
    pub async fn claim_job(&self, host_id: &str) -> CoordinatorResult<Option<JobRecord>> {
        let Some(job) = self.state.claim_job(host_id)? else {
            metrics::record_claim("empty");
            return Ok(None);
        };

        metrics::record_claim("leased");
        self.refresh_gauges();
        self.replicate().await?;
        Ok(Some(job))
    }

    pub async fn complete_job(
        &self,
        job_id: &str,
        report: CompleteJobRequest,
    ) -> CoordinatorResult<JobRecord> {
        let job = self.state.complete_job(job_id, report)?;
        metrics::record_completion(job.status.as_str());
        self.refresh_gauges();
        self.replicate().await?;
        Ok(job)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    /// Merge a snapshot pushed by a peer (never re-replicated)
    pub fn merge_snapshot(&self, incoming: &Snapshot) -> CoordinatorResult<MergeOutcome> {
        let outcome = self.state.merge_snapshot(incoming)?;
        if outcome.changed {
            self.refresh_gauges();
        }
        Ok(outcome)
    }

    pub fn requeue_expired_leases(&self) -> CoordinatorResult<usize> {
        self.state.requeue_expired_leases()
    }

    pub fn stats(&self) -> StateStats {
        self.state.stats()
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("node_id", &self.node_id)
            .field("required_acks", &self.required_acks)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

/// Transport for a node with an empty peer list
struct NoPeers;

#[async_trait::async_trait]
impl PeerTransport for NoPeers {
    async fn push_snapshot(
        &self,
        peer: &str,
        _snapshot: &Snapshot,
    ) -> Result<(), super::peer::PeerError> {
        Err(super::peer::PeerError::Network {
            peer: peer.to_string(),
            message: "no peers configured".to_string(),
        })
    }

    async fn fetch_snapshot(&self, peer: &str) -> Result<Snapshot, super::peer::PeerError> {
        Err(super::peer::PeerError::Network {
            peer: peer.to_string(),
            message: "no peers configured".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::peer::PeerError;
    use crate::models::{JobPayload, ShellPayload};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Acks pushes to peers listed in `reachable`, counts every push
    struct CountingTransport {
        reachable: Vec<String>,
        pushes: AtomicUsize,
    }

    #[async_trait]
    impl PeerTransport for CountingTransport {
        async fn push_snapshot(&self, peer: &str, _snapshot: &Snapshot) -> Result<(), PeerError> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            if self.reachable.iter().any(|p| p == peer) {
                Ok(())
            } else {
                Err(PeerError::Rejected {
                    peer: peer.to_string(),
                    status: 502,
                })
            }
        }

        async fn fetch_snapshot(&self, _peer: &str) -> Result<Snapshot, PeerError> {
            Ok(Snapshot::default())
        }
    }

    fn node(peers: &[&str], reachable: &[&str], min_replicas: usize) -> (Coordinator, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport {
            reachable: reachable.iter().map(|p| p.to_string()).collect(),
            pushes: AtomicUsize::new(0),
        });
        let sync = PeerSynchronizer::new(
            peers.iter().map(|p| p.to_string()).collect(),
            transport.clone(),
        );
        let coordinator = Coordinator::new(
            "node-a",
            Arc::new(CoordinatorState::in_memory()),
            Arc::new(sync),
            min_replicas,
        )
        .unwrap();
        (coordinator, transport)
    }

    #[test]
    fn test_new_checks_peer_capacity() {
        let sync = Arc::new(PeerSynchronizer::new(
            vec!["http://p1".to_string()],
            Arc::new(NoPeers),
        ));
        let err = Coordinator::new("n", Arc::new(CoordinatorState::in_memory()), sync, 3)
            .unwrap_err();
        assert!(err.to_string().contains("requires at least 2 peers"));
    }

    #[tokio::test]
    async fn test_quorum_not_met_keeps_local_mutation() {
        let (coordinator, _) = node(&["http://p1", "http://p2"], &["http://p1"], 3);

        let err = coordinator
            .register_host(RegisterHostRequest::new("node-a", &["shell"], 1).with_id("h1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoordinatorError::ReplicationQuorumNotMet {
                required: 2,
                acked: 1
            }
        ));
        assert!(coordinator.snapshot().find_host("h1").is_some());
    }

    #[tokio::test]
    async fn test_quorum_met() {
        let (coordinator, _) = node(&["http://p1", "http://p2"], &["http://p1", "http://p2"], 3);
        let host = coordinator
            .register_host(RegisterHostRequest::new("node-a", &[], 1))
            .await
            .unwrap();
        assert_eq!(coordinator.required_acks(), 2);
        assert!(coordinator.state().host(&host.id).is_some());
    }

    #[tokio::test]
    async fn test_empty_claim_is_not_replicated() {
        let (coordinator, transport) = node(&["http://p1"], &["http://p1"], 2);
        coordinator
            .register_host(RegisterHostRequest::new("node-a", &[], 1).with_id("h1"))
            .await
            .unwrap();
        let after_register = transport.pushes.load(Ordering::SeqCst);

        assert!(coordinator.claim_job("h1").await.unwrap().is_none());
        assert_eq!(transport.pushes.load(Ordering::SeqCst), after_register);

        coordinator
            .enqueue_job(EnqueueJobRequest::new(
                JobPayload::Shell(ShellPayload {
                    command: "true".into(),
                    ..Default::default()
                }),
                &[],
            ))
            .await
            .unwrap();
        assert!(coordinator.claim_job("h1").await.unwrap().is_some());
        assert_eq!(transport.pushes.load(Ordering::SeqCst), after_register + 2);
    }

    #[tokio::test]
    async fn test_standalone_never_waits_for_peers() {
        let coordinator = Coordinator::standalone("solo", Arc::new(CoordinatorState::in_memory()));
        assert_eq!(coordinator.required_acks(), 0);
        coordinator
            .register_host(RegisterHostRequest::new("node-a", &[], 1))
            .await
            .unwrap();
    }
}

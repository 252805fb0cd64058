//! Peer synchronization
//!
//! Push: after a local mutation the full snapshot is sent to every peer at
//! once. Each push runs in its own task with its own deadline; a slow or dead
//! peer only costs its own acknowledgement.
//!
//! Pull: on a timer every peer's snapshot is fetched and merged locally.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::interval;

use crate::metrics;
use crate::models::Snapshot;

use super::peer::{PeerError, PeerTransport};
use super::state::CoordinatorState;

/// Default deadline for one snapshot push
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one replication fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationReport {
    pub acked: usize,
    pub attempted: usize,
}

/// Outcome of one anti-entropy round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Peers whose snapshot was fetched
    pub fetched: usize,
    /// Peers whose snapshot changed local state
    pub merged: usize,
    /// Peers that could not be reached or merged
    pub failed: usize,
}

/// Fan-out and anti-entropy against a fixed peer list
pub struct PeerSynchronizer {
    peers: Vec<String>,
    transport: Arc<dyn PeerTransport>,
    push_timeout: Duration,
}

impl PeerSynchronizer {
    pub fn new(peers: Vec<String>, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            peers,
            transport,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }

    pub fn with_push_timeout(mut self, push_timeout: Duration) -> Self {
        self.push_timeout = push_timeout;
        self
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Push a snapshot to every peer concurrently and count acknowledgements
    pub async fn push_snapshot(&self, snapshot: Snapshot) -> ReplicationReport {
        if self.peers.is_empty() {
            return ReplicationReport::default();
        }

        let snapshot = Arc::new(snapshot);
        let mut pushes = JoinSet::new();

        for peer in &self.peers {
            let peer = peer.clone();
            let transport = Arc::clone(&self.transport);
            let snapshot = Arc::clone(&snapshot);
            let deadline = self.push_timeout;

            pushes.spawn(async move {
                let result =
                    match tokio::time::timeout(deadline, transport.push_snapshot(&peer, &snapshot))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(PeerError::Timeout {
                            peer: peer.clone(),
                            after: deadline,
                        }),
                    };
                (peer, result)
            });
        }

        let mut report = ReplicationReport {
            acked: 0,
            attempted: self.peers.len(),
        };

        while let Some(joined) = pushes.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {
                    report.acked += 1;
                    metrics::record_replication_push("acked");
                }
                Ok((peer, Err(e))) => {
                    tracing::debug!(peer = %peer, error = %e, "Snapshot push not acknowledged");
                    metrics::record_replication_push("failed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Snapshot push task aborted");
                    metrics::record_replication_push("failed");
                }
            }
        }

        report
    }

    /// Fetch every peer's snapshot and merge it into `state`
    pub async fn pull_and_merge(&self, state: &CoordinatorState) -> SyncReport {
        let mut fetches = JoinSet::new();

        for peer in &self.peers {
            let peer = peer.clone();
            let transport = Arc::clone(&self.transport);
            let deadline = self.push_timeout;

            fetches.spawn(async move {
                let result = match tokio::time::timeout(deadline, transport.fetch_snapshot(&peer))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PeerError::Timeout {
                        peer: peer.clone(),
                        after: deadline,
                    }),
                };
                (peer, result)
            });
        }

        let mut report = SyncReport::default();

        while let Some(joined) = fetches.join_next().await {
            let (peer, snapshot) = match joined {
                Ok((peer, Ok(snapshot))) => (peer, snapshot),
                Ok((peer, Err(e))) => {
                    tracing::debug!(peer = %peer, error = %e, "Peer sync skipped");
                    metrics::record_peer_pull("failed");
                    report.failed += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Peer sync task aborted");
                    metrics::record_peer_pull("failed");
                    report.failed += 1;
                    continue;
                }
            };

            report.fetched += 1;
            match state.merge_snapshot(&snapshot) {
                Ok(outcome) if outcome.changed => {
                    report.merged += 1;
                    metrics::record_peer_pull("merged");
                    tracing::debug!(
                        peer = %peer,
                        hosts = outcome.hosts_adopted,
                        jobs = outcome.jobs_adopted,
                        "Adopted records from peer"
                    );
                }
                Ok(_) => metrics::record_peer_pull("unchanged"),
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Failed to merge peer snapshot");
                    metrics::record_peer_pull("failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Spawn the periodic anti-entropy task
    pub fn spawn_anti_entropy(
        self: Arc<Self>,
        state: Arc<CoordinatorState>,
        every: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.pull_and_merge(&state).await;
                        if report.merged > 0 {
                            tracing::info!(
                                fetched = report.fetched,
                                merged = report.merged,
                                failed = report.failed,
                                "Anti-entropy round adopted peer changes"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Anti-entropy task shutting down");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for PeerSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSynchronizer")
            .field("peers", &self.peers)
            .field("push_timeout", &self.push_timeout)
            .finish_non_exhaustive()
    }
}

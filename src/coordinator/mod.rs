//! Lease-based job coordinator
//!
//! This module provides the coordinator node: the host registry, the job
//! ledger, lease scheduling, quorum-gated replication to peer coordinators,
//! and the HTTP surface hosts and submitters talk to.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Coordinator Server            │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │  CoordinatorState (one lock)       │  │
//! │  │  - HostRegistry                    │  │
//! │  │  - JobLedger                       │  │
//! │  │  - lease sweep                     │  │
//! │  └────────────────────────────────────┘  │
//! │                  │ save_changes          │
//! │  ┌────────────────────────────────────┐  │
//! │  │  CoordinatorStore (SQLite/memory)  │  │
//! │  └────────────────────────────────────┘  │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │  PeerSynchronizer                  │  │
//! │  │  - push after every write (quorum) │  │
//! │  │  - anti-entropy pull               │  │
//! │  └────────────────────────────────────┘  │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │  REST API                          │  │
//! │  │  POST /v1/hosts/register           │  │
//! │  │  POST /v1/hosts/{id}/heartbeat     │  │
//! │  │  POST /v1/hosts/{id}/claim         │  │
//! │  │  POST /v1/jobs                     │  │
//! │  │  POST /v1/jobs/{id}/complete       │  │
//! │  │  GET  /v1/state                    │  │
//! │  │  POST /v1/replicate/snapshot       │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use skyclaw::coordinator::{CoordinatorConfig, CoordinatorServer};
//!
//! let config = CoordinatorConfig::builder().min_replicas(1).build()?;
//! let server = CoordinatorServer::new(config)?;
//! server.start().await?;
//! ```

pub mod api;
pub mod capability;
pub mod client;
pub mod config;
pub mod error;
pub mod ledger;
pub mod node;
pub mod peer;
pub mod registry;
pub mod replication;
pub mod server;
pub mod state;
pub mod sync;

// Re-export main types
pub use capability::{has_capabilities, normalize_capabilities, CapabilitySet};
pub use client::{ClientConfig, ClientError, CoordinatorClient};
pub use config::{ConfigError, CoordinatorConfig};
pub use error::{CoordinatorError, CoordinatorResult};
pub use ledger::{JobLedger, LedgerStats};
pub use node::Coordinator;
pub use peer::{HttpPeerTransport, PeerError, PeerTransport};
pub use registry::{HostRegistry, RegistryStats};
pub use replication::{
    assert_peer_capacity, normalize_min_replicas, required_peer_replications,
    ReplicationPolicyError,
};
pub use server::{AppState, CoordinatorServer, ServerError};
pub use state::{CoordinatorState, MergeOutcome, StateOptions};
pub use sync::PeerSynchronizer;

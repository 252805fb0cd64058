//! skyclaw - lease-based compute job coordinator
//!
//! Dispatches compute jobs from coordinator nodes to a fleet of worker hosts
//! that lease, execute and report on them.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading (TOML file and `SKYCLAW_*` environment)
//! - [`coordinator`] - State engine, replication, HTTP server and client
//! - [`host`] - Host agent and process runner
//! - [`models`] - Records, payloads and request types shared on the wire
//! - [`storage`] - Durable store for hosts and jobs (SQLite, in-memory)
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use skyclaw::coordinator::{CoordinatorConfig, CoordinatorServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CoordinatorConfig::builder().min_replicas(1).build()?;
//!     let server = CoordinatorServer::new(config)?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod metrics;
pub mod models;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{Coordinator, CoordinatorServer, CoordinatorState};
    pub use crate::error::{Error, ErrorCategory, Result, SkyclawErrorTrait};
    pub use crate::host::HostAgent;
    pub use crate::models::{HostRecord, JobPayload, JobRecord, JobStatus, Snapshot};
    pub use crate::storage::{CoordinatorStore, SqliteCoordinatorStore};
}

// Direct re-exports for convenience
pub use models::{HostRecord, JobPayload, JobRecord, JobStatus, Snapshot};

//! Worker host side of skyclaw
//!
//! A host registers with a coordinator, heartbeats, polls for leases and runs
//! each leased payload as a local process.
//!
//! # Usage
//!
//! ```ignore
//! use skyclaw::host::{HostAgent, HostConfig};
//!
//! let agent = HostAgent::new(HostConfig::default())?;
//! let handle = agent.start().await?;
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! ```

pub mod agent;
pub mod config;
pub mod runner;

pub use agent::{AgentError, AgentHandle, AgentState, HostAgent, ProcessedJob};
pub use config::HostConfig;
pub use runner::{ExecutionConfig, JobRunner, RunOutcome, RunnerError};

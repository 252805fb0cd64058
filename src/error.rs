//! Crate-wide error type
//!
//! Each layer keeps its own error (`CoordinatorError` for the state engine,
//! `ClientError` for host calls, `RunnerError` for process execution, ...).
//! [`Error`] wraps all of them so callers that cross layers can use one type.
//!
//! - [`SkyclawErrorTrait`] - retry and classification hooks shared by every error
//! - [`ErrorCategory`] - coarse bucket used by logs and retry decisions
//! - [`Error`] - the wrapper enum
//!
//! # Usage
//!
//! ```rust,ignore
//! use skyclaw::error::{Error, SkyclawErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::coordinator::client::ClientError;
pub use crate::coordinator::error::CoordinatorError;
pub use crate::coordinator::peer::PeerError;
pub use crate::coordinator::replication::ReplicationPolicyError;
pub use crate::coordinator::server::ServerError;
pub use crate::host::agent::AgentError;
pub use crate::host::runner::RunnerError;
pub use crate::storage::StorageError;

/// Common trait for skyclaw error types
pub trait SkyclawErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed or incomplete requests
    Validation,
    /// Referenced host or job does not exist
    NotFound,
    /// Lease ownership or state conflicts
    Conflict,
    /// Peer quorum and replication failures
    Replication,
    /// Network-related errors (HTTP, timeout)
    Network,
    /// Storage and I/O errors
    Storage,
    /// Job execution errors on a host
    Execution,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Replication => "replication",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Execution => "execution",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the skyclaw crate
#[derive(Error, Debug)]
pub enum Error {
    /// Coordinator state engine errors
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Durable store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Startup replication policy violations
    #[error("Replication policy error: {0}")]
    Replication(#[from] ReplicationPolicyError),

    /// Peer coordinator transport errors
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    /// Coordinator HTTP client errors
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Coordinator server lifecycle errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Host job runner errors
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    /// Host agent errors
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SkyclawErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Coordinator(e) => e.is_recoverable(),
            Self::Storage(_) => false,
            Self::Replication(_) => false,
            Self::Peer(_) => true,
            Self::Client(e) => e.is_retryable(),
            Self::Server(_) => false,
            Self::Runner(_) => false,
            Self::Agent(AgentError::Coordinator(e)) => e.is_retryable(),
            Self::Agent(_) => false,
            Self::Database(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Http(_) => true, // HTTP errors are often transient
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Coordinator(e) => e.category(),
            Self::Storage(_) | Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Replication(_) => ErrorCategory::Config,
            Self::Peer(_) | Self::Client(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Server(_) => ErrorCategory::Network,
            Self::Runner(_) => ErrorCategory::Execution,
            Self::Agent(AgentError::ConfigError(_)) => ErrorCategory::Config,
            Self::Agent(_) => ErrorCategory::Network,
            Self::Json(_) => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

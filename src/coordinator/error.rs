//! Error types for coordinator operations

use thiserror::Error;

use crate::error::{ErrorCategory, SkyclawErrorTrait};
use crate::storage::StorageError;

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Failures of the coordinator state engine
///
/// Every variant except [`CoordinatorError::ReplicationQuorumNotMet`] means the
/// in-memory state was left untouched.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Request rejected at the boundary
    #[error("{0}")]
    Validation(String),

    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// The reporting host does not hold the job's lease
    #[error("job {job_id} is not assigned to host {host_id}")]
    NotAssigned { job_id: String, host_id: String },

    /// Completion reported for a job that is not leased
    #[error("job {job_id} is not leased (status: {status})")]
    NotLeased { job_id: String, status: String },

    /// The mutation was applied locally but too few peers acknowledged it
    #[error("replication target not met: required {required} peer acks, got {acked}")]
    ReplicationQuorumNotMet { required: usize, acked: usize },

    /// Durable write failed; in-memory state unchanged
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CoordinatorError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the mutation behind this error is already visible locally
    pub fn mutation_applied(&self) -> bool {
        matches!(self, Self::ReplicationQuorumNotMet { .. })
    }
}

impl SkyclawErrorTrait for CoordinatorError {
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ReplicationQuorumNotMet { .. } | Self::Storage(_)
        )
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::UnknownHost(_) | Self::UnknownJob(_) => ErrorCategory::NotFound,
            Self::NotAssigned { .. } | Self::NotLeased { .. } => ErrorCategory::Conflict,
            Self::ReplicationQuorumNotMet { .. } => ErrorCategory::Replication,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }
}

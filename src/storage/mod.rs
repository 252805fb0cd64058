//! Durable persistence for coordinator state
//!
//! The coordinator only needs two things from storage: write every changed
//! record through before an operation returns, and hand everything back at
//! startup. Hosts are always loaded before jobs.

pub mod repository;

use std::sync::Arc;

use thiserror::Error;

use crate::models::{HostRecord, JobRecord};

pub use repository::{
    create_memory_store, create_sqlite_store, MemoryCoordinatorStore, SqliteCoordinatorStore,
};

/// Errors raised by a durable store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Records touched by a single coordinator operation
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub hosts: Vec<HostRecord>,
    pub jobs: Vec<JobRecord>,
}

impl ChangeSet {
    pub fn host(host: HostRecord) -> Self {
        Self {
            hosts: vec![host],
            jobs: Vec::new(),
        }
    }

    pub fn job(job: JobRecord) -> Self {
        Self {
            hosts: Vec::new(),
            jobs: vec![job],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.jobs.is_empty()
    }
}

/// Per-entity save / load-all persistence
pub trait CoordinatorStore: Send + Sync {
    /// Insert or replace a host
    fn save_host(&self, host: &HostRecord) -> StorageResult<()>;

    /// Insert or replace a job
    fn save_job(&self, job: &JobRecord) -> StorageResult<()>;

    /// Every persisted host
    fn load_hosts(&self) -> StorageResult<Vec<HostRecord>>;

    /// Every persisted job, oldest first
    fn load_jobs(&self) -> StorageResult<Vec<JobRecord>>;

    /// Write a whole change set (hosts first)
    fn save_changes(&self, changes: &ChangeSet) -> StorageResult<()> {
        for host in &changes.hosts {
            self.save_host(host)?;
        }
        for job in &changes.jobs {
            self.save_job(job)?;
        }
        Ok(())
    }
}

/// Thread-safe shared store handle
pub type SharedCoordinatorStore = Arc<dyn CoordinatorStore>;

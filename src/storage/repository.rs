//! Store implementations
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │          CoordinatorState           │
//! └─────────────────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────┐
//! │       CoordinatorStore trait        │
//! └─────────────────────────────────────┘
//!          │                    │
//!          ▼                    ▼
//! ┌─────────────────┐  ┌─────────────────┐
//! │     SQLite      │  │    In-memory    │
//! └─────────────────┘  └─────────────────┘
//! ```
//!
//! Records are stored as JSON documents keyed by id, the same encoding used
//! on the replication wire.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::SecondsFormat;
use rusqlite::{params, Connection};

use crate::models::{HostRecord, JobRecord};

use super::{ChangeSet, CoordinatorStore, SharedCoordinatorStore, StorageResult};

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite-backed store
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteCoordinatorStore {
    conn: Mutex<Connection>,
}

impl SqliteCoordinatorStore {
    /// Open (or create) a store at `path`
    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite coordinator store initialized");
        Ok(store)
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> StorageResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_schema(&self) -> StorageResult<()> {
        self.conn().execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS hosts (
                    id TEXT PRIMARY KEY,
                    json TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL,
                    json TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_created_at
                    ON jobs(created_at);
                "#,
        )?;
        Ok(())
    }

    fn write_host(conn: &Connection, host: &HostRecord) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO hosts (id, json) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET json = excluded.json",
            params![host.id, serde_json::to_string(host)?],
        )?;
        Ok(())
    }

    fn write_job(conn: &Connection, job: &JobRecord) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO jobs (id, created_at, json) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET created_at = excluded.created_at, json = excluded.json",
            params![
                job.id,
                job.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                serde_json::to_string(job)?
            ],
        )?;
        Ok(())
    }

    fn read_documents<T: for<'de> serde::Deserialize<'de>>(
        conn: &Connection,
        query: &str,
        table: &str,
    ) -> StorageResult<Vec<T>> {
        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            let json = row?;
            match serde_json::from_str(&json) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(table, error = %e, "Skipping undecodable stored record"),
            }
        }
        Ok(records)
    }
}

impl CoordinatorStore for SqliteCoordinatorStore {
    fn save_host(&self, host: &HostRecord) -> StorageResult<()> {
        Self::write_host(&self.conn(), host)
    }

    fn save_job(&self, job: &JobRecord) -> StorageResult<()> {
        Self::write_job(&self.conn(), job)
    }

    fn load_hosts(&self) -> StorageResult<Vec<HostRecord>> {
        Self::read_documents(&self.conn(), "SELECT json FROM hosts", "hosts")
    }

    fn load_jobs(&self) -> StorageResult<Vec<JobRecord>> {
        Self::read_documents(
            &self.conn(),
            "SELECT json FROM jobs ORDER BY created_at ASC",
            "jobs",
        )
    }

    fn save_changes(&self, changes: &ChangeSet) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for host in &changes.hosts {
            Self::write_host(&tx, host)?;
        }
        for job in &changes.jobs {
            Self::write_job(&tx, job)?;
        }
        tx.commit()?;
        Ok(())
    }
}

// ============================================================================
// In-memory Implementation (for testing)
// ============================================================================

/// In-memory store, useful for tests and ephemeral coordinators
#[derive(Debug, Default)]
pub struct MemoryCoordinatorStore {
    hosts: RwLock<HashMap<String, HostRecord>>,
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl MemoryCoordinatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted records (hosts + jobs)
    pub fn len(&self) -> usize {
        let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        hosts.len() + jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CoordinatorStore for MemoryCoordinatorStore {
    fn save_host(&self, host: &HostRecord) -> StorageResult<()> {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        hosts.insert(host.id.clone(), host.clone());
        Ok(())
    }

    fn save_job(&self, job: &JobRecord) -> StorageResult<()> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn load_hosts(&self) -> StorageResult<Vec<HostRecord>> {
        let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(hosts.values().cloned().collect())
    }

    fn load_jobs(&self) -> StorageResult<Vec<JobRecord>> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut loaded: Vec<_> = jobs.values().cloned().collect();
        loaded.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(loaded)
    }
}

// ============================================================================
// Shared Store Constructors
// ============================================================================

/// Create a shared SQLite store
pub fn create_sqlite_store(path: impl AsRef<Path>) -> StorageResult<SharedCoordinatorStore> {
    Ok(Arc::new(SqliteCoordinatorStore::new(path)?))
}

/// Create a shared in-memory store
pub fn create_memory_store() -> SharedCoordinatorStore {
    Arc::new(MemoryCoordinatorStore::new())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::capability::normalize_capabilities;
    use crate::models::{AutomatonRunPayload, JobPayload, JobStatus};
    use chrono::{Duration, Utc};

    fn create_test_stores() -> Vec<Box<dyn CoordinatorStore>> {
        vec![
            Box::new(SqliteCoordinatorStore::in_memory().unwrap()),
            Box::new(MemoryCoordinatorStore::new()),
        ]
    }

    fn sample_host(id: &str) -> HostRecord {
        let now = Utc::now();
        HostRecord {
            id: id.to_string(),
            name: "worker".to_string(),
            capabilities: normalize_capabilities(["shell"]),
            max_parallel: 2,
            active_leases: 0,
            last_seen_at: now,
            registered_at: now,
        }
    }

    fn sample_job(id: &str, offset_secs: i64) -> JobRecord {
        JobRecord::new(
            id.to_string(),
            JobPayload::AutomatonRun(AutomatonRunPayload::default()),
            normalize_capabilities(["automaton"]),
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[test]
    fn test_empty_store_is_first_run() {
        for store in create_test_stores() {
            assert!(store.load_hosts().unwrap().is_empty());
            assert!(store.load_jobs().unwrap().is_empty());
        }
    }

    #[test]
    fn test_save_host_upserts() {
        for store in create_test_stores() {
            let mut host = sample_host("h1");
            store.save_host(&host).unwrap();

            host.active_leases = 1;
            store.save_host(&host).unwrap();

            let hosts = store.load_hosts().unwrap();
            assert_eq!(hosts.len(), 1);
            assert_eq!(hosts[0].active_leases, 1);
        }
    }

    #[test]
    fn test_jobs_load_oldest_first() {
        for store in create_test_stores() {
            store.save_job(&sample_job("newer", 10)).unwrap();
            store.save_job(&sample_job("older", 0)).unwrap();

            let ids: Vec<_> = store.load_jobs().unwrap().into_iter().map(|j| j.id).collect();
            assert_eq!(ids, vec!["older", "newer"]);
        }
    }

    #[test]
    fn test_save_changes() {
        for store in create_test_stores() {
            let mut job = sample_job("j1", 0);
            job.status = JobStatus::Leased;
            job.assigned_host_id = Some("h1".to_string());

            let changes = ChangeSet {
                hosts: vec![sample_host("h1")],
                jobs: vec![job.clone()],
            };
            store.save_changes(&changes).unwrap();

            assert_eq!(store.load_hosts().unwrap().len(), 1);
            assert_eq!(store.load_jobs().unwrap(), vec![job]);
        }
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("coordinator.db");

        {
            let store = SqliteCoordinatorStore::new(&path).unwrap();
            store.save_host(&sample_host("h1")).unwrap();
            store.save_job(&sample_job("j1", 0)).unwrap();
        }

        let reopened = SqliteCoordinatorStore::new(&path).unwrap();
        assert_eq!(reopened.load_hosts().unwrap()[0].id, "h1");
        assert_eq!(reopened.load_jobs().unwrap()[0].id, "j1");
    }

    #[test]
    fn test_sqlite_skips_corrupt_rows() {
        let store = SqliteCoordinatorStore::in_memory().unwrap();
        store.save_host(&sample_host("good")).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO hosts (id, json) VALUES ('bad', '{not json')",
                [],
            )
            .unwrap();

        let hosts = store.load_hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].id, "good");
    }

    #[test]
    fn test_memory_store_utilities() {
        let store = MemoryCoordinatorStore::new();
        assert!(store.is_empty());

        store.save_host(&sample_host("h1")).unwrap();
        store.save_job(&sample_job("j1", 0)).unwrap();
        assert_eq!(store.len(), 2);

        let shared = create_memory_store();
        assert!(shared.load_hosts().unwrap().is_empty());
    }
}

//! Host agent: register, heartbeat, claim, execute, report
//!
//! Handles:
//! - Registration with the coordinator
//! - Periodic heartbeats carrying the local in-flight count
//! - `max_parallel` worker loops polling for leases
//! - Graceful shutdown (running jobs finish and are reported)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::time::interval;

use crate::coordinator::client::{ClientConfig, ClientError, CoordinatorClient};
use crate::metrics;
use crate::models::{HostRecord, RegisterHostRequest};

use super::config::HostConfig;
use super::runner::JobRunner;

// ============================================================================
// Agent State
// ============================================================================

/// Counters kept by a running agent
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    /// Host record as last returned by the coordinator
    pub host: Option<HostRecord>,

    pub jobs_succeeded: u64,
    pub jobs_failed: u64,

    /// Completion reports the coordinator did not accept
    pub report_failures: u64,
}

/// One job taken through claim, execution and report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedJob {
    pub job_id: String,
    pub success: bool,
    pub exit_code: i32,
    pub reported: bool,
}

// ============================================================================
// Host Agent
// ============================================================================

/// Worker-side daemon talking to one coordinator
#[derive(Clone)]
pub struct HostAgent {
    config: HostConfig,
    client: CoordinatorClient,
    runner: JobRunner,
    state: Arc<RwLock<AgentState>>,
    in_flight: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
}

impl HostAgent {
    /// Create a new agent
    pub fn new(config: HostConfig) -> Result<Self, AgentError> {
        config.validate().map_err(AgentError::ConfigError)?;

        let client_config = ClientConfig::new(&config.coordinator_url)
            .with_token(config.token.clone())
            .with_timeout(config.request_timeout());
        let client =
            CoordinatorClient::new(client_config).map_err(|e| AgentError::InitError(e.to_string()))?;

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            runner: JobRunner::new(config.execution.clone()),
            config,
            client,
            state: Arc::new(RwLock::new(AgentState::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown,
        })
    }

    /// Replace the coordinator client (retry policy, timeouts)
    pub fn with_client(mut self, client: CoordinatorClient) -> Self {
        self.client = client;
        self
    }

    pub async fn state(&self) -> AgentState {
        self.state.read().await.clone()
    }

    /// Jobs currently executing on this host
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn host_id(&self) -> Option<String> {
        self.state.read().await.host.as_ref().map(|h| h.id.clone())
    }

    /// Register (or re-register) with the coordinator
    pub async fn register(&self) -> Result<HostRecord, AgentError> {
        let known_id = match self.host_id().await {
            Some(id) => Some(id),
            None => self.config.host_id.clone(),
        };

        let request = RegisterHostRequest {
            host_id: known_id,
            name: self.config.host_name.clone(),
            capabilities: self.config.capabilities.clone(),
            max_parallel: Some(self.config.max_parallel),
        };

        tracing::info!(
            coordinator = %self.config.coordinator_url,
            name = %request.name,
            capabilities = ?request.capabilities,
            "Registering host"
        );

        let host = self
            .client
            .register(&request)
            .await
            .map_err(AgentError::Registration)?;

        tracing::info!(host_id = %host.id, name = %host.name, "Host registered");
        self.state.write().await.host = Some(host.clone());
        Ok(host)
    }

    /// Send one heartbeat; re-registers when the coordinator forgot this host
    pub async fn heartbeat(&self) -> Result<HostRecord, AgentError> {
        let Some(host_id) = self.host_id().await else {
            return self.register().await;
        };

        let active = i64::try_from(self.in_flight()).unwrap_or(i64::MAX);
        match self.client.heartbeat(&host_id, Some(active)).await {
            Ok(host) => {
                self.state.write().await.host = Some(host.clone());
                Ok(host)
            }
            Err(e) if e.status() == Some(404) => {
                tracing::warn!(host_id = %host_id, "Coordinator does not know this host, re-registering");
                self.register().await
            }
            Err(e) => Err(AgentError::Coordinator(e)),
        }
    }

    /// Claim one job, run it and report the outcome
    ///
    /// Returns `None` when the coordinator had nothing for this host.
    pub async fn run_once(&self) -> Result<Option<ProcessedJob>, AgentError> {
        let host_id = match self.host_id().await {
            Some(id) => id,
            None => self.register().await?.id,
        };

        let Some(job) = self
            .client
            .claim(&host_id)
            .await
            .map_err(AgentError::Coordinator)?
        else {
            return Ok(None);
        };

        tracing::info!(job_id = %job.id, kind = job.payload.kind(), attempt = job.attempts, "Running job");

        let outcome = {
            let _slot = InFlightSlot::acquire(&self.in_flight);
            self.runner.run(&job.payload).await
        };

        let success = outcome.success;
        let exit_code = outcome.exit_code;
        let reported = match self
            .client
            .complete(&job.id, &outcome.into_report(host_id.as_str()))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                // The lease expires and the job is handed out again
                tracing::warn!(job_id = %job.id, error = %e, "Failed to report job completion");
                false
            }
        };

        {
            let mut state = self.state.write().await;
            if success {
                state.jobs_succeeded += 1;
            } else {
                state.jobs_failed += 1;
            }
            if !reported {
                state.report_failures += 1;
            }
        }

        tracing::info!(job_id = %job.id, success, exit_code, "Job finished");
        Ok(Some(ProcessedJob {
            job_id: job.id,
            success,
            exit_code,
            reported,
        }))
    }

    /// Register and spawn the heartbeat task plus one worker per parallel slot
    pub async fn start(&self) -> Result<AgentHandle, AgentError> {
        self.register().await?;

        let mut tasks = vec![self.spawn_heartbeat_task()];
        for worker in 0..self.config.max_parallel {
            tasks.push(self.spawn_worker(worker));
        }

        tracing::info!(workers = self.config.max_parallel, "Host agent started");

        Ok(AgentHandle {
            tasks,
            shutdown: self.shutdown.clone(),
        })
    }

    fn spawn_heartbeat_task(&self) -> tokio::task::JoinHandle<()> {
        let agent = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(agent.config.heartbeat_interval());
            // first tick fires immediately; registration just happened
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match agent.heartbeat().await {
                            Ok(host) => tracing::debug!(
                                host_id = %host.id,
                                active_leases = host.active_leases,
                                "Heartbeat sent"
                            ),
                            Err(e) => tracing::warn!(error = %e, "Heartbeat failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Heartbeat task shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_worker(&self, worker: u32) -> tokio::task::JoinHandle<()> {
        let agent = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let idle = match agent.run_once().await {
                    Ok(Some(_)) => false,
                    Ok(None) => true,
                    Err(e) => {
                        tracing::warn!(worker, error = %e, "Worker loop error");
                        true
                    }
                };

                if idle {
                    tokio::select! {
                        _ = tokio::time::sleep(agent.config.poll_interval()) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
            tracing::info!(worker, "Worker shutting down");
        })
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Counts one running job for the duration of its execution
struct InFlightSlot<'a>(&'a AtomicUsize);

impl<'a> InFlightSlot<'a> {
    fn acquire(counter: &'a AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_jobs_in_flight(now);
        Self(counter)
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        let now = self.0.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_jobs_in_flight(now);
    }
}

// ============================================================================
// Agent Handle
// ============================================================================

/// Handle to a running host agent
pub struct AgentHandle {
    tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl AgentHandle {
    /// Wait for all tasks to complete
    pub async fn wait(self) {
        futures::future::join_all(self.tasks).await;
    }

    /// Trigger shutdown and wait
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.wait().await;
    }

    /// Check if tasks are still running
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }
}

// ============================================================================
// Agent Errors
// ============================================================================

/// Agent errors
#[derive(Debug, Clone)]
pub enum AgentError {
    /// Initialization error
    InitError(String),

    /// Configuration error
    ConfigError(String),

    /// Registration was refused or unreachable
    Registration(ClientError),

    /// Coordinator communication error
    Coordinator(ClientError),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::Registration(e) => write!(f, "Registration failed: {}", e),
            Self::Coordinator(e) => write!(f, "Coordinator error: {}", e),
        }
    }
}

impl std::error::Error for AgentError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_creation() {
        let agent = HostAgent::new(HostConfig::default()).unwrap();
        assert_eq!(agent.in_flight(), 0);
    }

    #[test]
    fn test_agent_rejects_bad_config() {
        let config = HostConfig {
            max_parallel: 0,
            ..Default::default()
        };
        assert!(matches!(
            HostAgent::new(config),
            Err(AgentError::ConfigError(_))
        ));
    }

    #[test]
    fn test_in_flight_slot() {
        let counter = AtomicUsize::new(0);
        {
            let _a = InFlightSlot::acquire(&counter);
            let _b = InFlightSlot::acquire(&counter);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}

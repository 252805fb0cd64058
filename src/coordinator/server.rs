//! Coordinator server implementation
//!
//! This module wires the state engine, durable store, peer synchronizer and
//! HTTP router together and runs the background timers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::models::generate_id;
use crate::storage::{create_memory_store, create_sqlite_store};

use super::api::create_router;
use super::config::CoordinatorConfig;
use super::node::Coordinator;
use super::peer::{normalize_peer_urls, HttpPeerTransport, PeerTransport};
use super::replication::ReplicationPolicyError;
use super::state::{CoordinatorState, StateOptions};
use super::sync::PeerSynchronizer;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Coordinator node
    pub coordinator: Arc<Coordinator>,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: Arc<CoordinatorConfig>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, config: CoordinatorConfig) -> Self {
        Self {
            coordinator,
            start_time: Instant::now(),
            config: Arc::new(config),
        }
    }
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Main Coordinator server
pub struct CoordinatorServer {
    config: CoordinatorConfig,
    state: AppState,
    shutdown: watch::Sender<bool>,
}

impl CoordinatorServer {
    /// Create a new coordinator server talking to peers over HTTP
    pub fn new(config: CoordinatorConfig) -> Result<Self, ServerError> {
        let transport = HttpPeerTransport::new(config.auth_token.clone(), config.peer_timeout())
            .map_err(|e| ServerError::InitError(e.to_string()))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a server with a custom peer transport
    pub fn with_transport(
        config: CoordinatorConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let store = match &config.db_path {
            Some(path) => {
                create_sqlite_store(path).map_err(|e| ServerError::InitError(e.to_string()))?
            }
            None => create_memory_store(),
        };

        let state = CoordinatorState::new(
            StateOptions::default()
                .with_lease_duration(config.lease_duration())
                .with_store(store),
        )
        .map_err(|e| ServerError::InitError(e.to_string()))?;

        let peers = normalize_peer_urls(&config.peer_urls, config.bind_address.port());
        let sync =
            PeerSynchronizer::new(peers, transport).with_push_timeout(config.peer_timeout());

        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| generate_id("node"));

        let coordinator = Coordinator::new(
            node_id,
            Arc::new(state),
            Arc::new(sync),
            config.effective_min_replicas(),
        )
        .map_err(ServerError::PeerCapacity)?;

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            state: AppState::new(Arc::new(coordinator), config.clone()),
            config,
            shutdown,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.state.coordinator
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        // Add tracing layer if enabled
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start the server
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        &self,
        listener: tokio::net::TcpListener,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        tracing::info!(
            %addr,
            node_id = %self.state.coordinator.node_id(),
            peers = self.state.coordinator.synchronizer().peers().len(),
            required_acks = self.state.coordinator.required_acks(),
            "Starting Coordinator server"
        );

        self.initial_sync().await;
        let tasks = self.start_background_tasks();

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()));

        let _ = self.shutdown.send(true);
        for task in tasks {
            let _ = task.await;
        }

        tracing::info!("Coordinator server shutdown complete");
        result
    }

    /// Pull peer state once before accepting traffic
    async fn initial_sync(&self) {
        let sync = self.state.coordinator.synchronizer();
        if sync.peers().is_empty() {
            return;
        }

        let report = sync.pull_and_merge(self.state.coordinator.state()).await;
        tracing::info!(
            fetched = report.fetched,
            merged = report.merged,
            failed = report.failed,
            "Initial peer sync finished"
        );
    }

    /// Start background tasks
    fn start_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut tasks = Vec::new();

        // Lease sweep
        let coordinator = Arc::clone(&self.state.coordinator);
        let every = self.config.sweep_interval();
        let mut shutdown_rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.requeue_expired_leases() {
                            tracing::warn!(error = %e, "Lease sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Lease sweep task shutting down");
                        break;
                    }
                }
            }
        }));

        // Anti-entropy
        let sync = Arc::clone(self.state.coordinator.synchronizer());
        if !sync.peers().is_empty() {
            tasks.push(sync.spawn_anti_entropy(
                Arc::clone(self.state.coordinator.state()),
                self.config.peer_sync_interval(),
                self.shutdown.subscribe(),
            ));
        }

        tracing::info!(tasks = tasks.len(), "Background tasks started");
        tasks
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        let coordinator = &self.state.coordinator;
        ServerInfo {
            bind_address: self.config.bind_address,
            node_id: coordinator.node_id().to_string(),
            lease_ms: self.config.lease_ms,
            peers: coordinator.synchronizer().peers().to_vec(),
            min_replicas: self.config.effective_min_replicas(),
            required_acks: coordinator.required_acks(),
            persistent: self.config.db_path.is_some(),
            auth_enabled: self.config.auth_token.is_some(),
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub node_id: String,
    pub lease_ms: u64,
    pub peers: Vec<String>,
    pub min_replicas: usize,
    pub required_acks: usize,
    pub persistent: bool,
    pub auth_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Coordinator Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Node ID: {}\n\
             Lease: {}ms\n\
             Peers: {}\n\
             Replication: min replicas {} ({} peer acks required)\n\
             Storage: {}\n\
             Auth: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.node_id,
            self.lease_ms,
            if self.peers.is_empty() {
                "none".to_string()
            } else {
                self.peers.join(", ")
            },
            self.min_replicas,
            self.required_acks,
            if self.persistent { "sqlite" } else { "memory" },
            if self.auth_enabled { "token" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Initialization error
    InitError(String),

    /// Not enough peers configured for the replica target
    PeerCapacity(ReplicationPolicyError),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::InitError(msg) => write!(f, "Initialization error: {}", msg),
            Self::PeerCapacity(e) => write!(f, "Replication policy violated: {}", e),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn standalone_config() -> CoordinatorConfig {
        CoordinatorConfig::builder()
            .min_replicas(1)
            .node_id("node-test")
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_config_requires_peers() {
        let err = CoordinatorServer::new(CoordinatorConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::PeerCapacity(_)));
        assert!(err.to_string().contains("requires at least 99 peers"));
    }

    #[test]
    fn test_server_creation() {
        let server = CoordinatorServer::new(standalone_config()).unwrap();
        assert_eq!(server.coordinator().node_id(), "node-test");
        assert_eq!(server.coordinator().required_acks(), 0);
    }

    #[test]
    fn test_own_address_is_not_a_peer() {
        let config = CoordinatorConfig::builder()
            .peer("http://127.0.0.1:8787")
            .peer("http://10.0.0.2:8787/")
            .min_replicas(2)
            .build()
            .unwrap();

        let info = CoordinatorServer::new(config).unwrap().info();
        assert_eq!(info.peers, vec!["http://10.0.0.2:8787"]);
        assert_eq!(info.required_acks, 1);
        assert!(info.display().contains("1 peer acks required"));
    }

    #[test]
    fn test_sqlite_backed_server() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig::builder()
            .min_replicas(1)
            .db_path(dir.path().join("skyclaw.db"))
            .build()
            .unwrap();

        let info = CoordinatorServer::new(config).unwrap().info();
        assert!(info.persistent);
    }

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let server = CoordinatorServer::new(standalone_config()).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();

        server
            .serve(listener, async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            })
            .await
            .unwrap();
    }
}

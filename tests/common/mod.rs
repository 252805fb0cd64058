//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use skyclaw::coordinator::api::create_router;
use skyclaw::coordinator::{
    AppState, Coordinator, CoordinatorConfig, CoordinatorState, StateOptions,
};
use skyclaw::models::{
    CompleteJobRequest, EnqueueJobRequest, HostRecord, JobPayload, RegisterHostRequest,
    ShellPayload,
};

pub const TEST_TOKEN: &str = "test-token";

/// Shell payload running `command args...`
pub fn shell_payload(command: &str, args: &[&str]) -> JobPayload {
    JobPayload::Shell(ShellPayload {
        command: command.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        ..Default::default()
    })
}

/// Enqueue request for a shell job requiring `caps`
pub fn shell_job(command: &str, caps: &[&str]) -> EnqueueJobRequest {
    EnqueueJobRequest::new(shell_payload(command, &[]), caps)
}

/// Register a host and return the stored record
pub fn register(
    state: &CoordinatorState,
    name: &str,
    caps: &[&str],
    max_parallel: u32,
) -> HostRecord {
    state
        .register_host(RegisterHostRequest::new(name, caps, max_parallel))
        .expect("register host")
}

/// In-memory state with the given lease length
pub fn state_with_lease(lease: Duration) -> CoordinatorState {
    CoordinatorState::new(StateOptions::default().with_lease_duration(lease))
        .expect("in-memory state")
}

/// Successful completion report from `host_id`
pub fn success_report(host_id: &str) -> CompleteJobRequest {
    CompleteJobRequest {
        host_id: host_id.to_string(),
        success: true,
        exit_code: 0,
        stdout: "ok\n".to_string(),
        ..Default::default()
    }
}

/// Standalone coordinator node over fresh in-memory state
pub fn standalone_coordinator() -> Arc<Coordinator> {
    Arc::new(Coordinator::standalone(
        "node-test",
        Arc::new(CoordinatorState::in_memory()),
    ))
}

/// Router for a standalone node, optionally protected by [`TEST_TOKEN`]
pub fn test_router(with_token: bool) -> (Router, Arc<Coordinator>) {
    let coordinator = standalone_coordinator();
    let mut builder = CoordinatorConfig::builder().min_replicas(1);
    if with_token {
        builder = builder.auth_token(TEST_TOKEN);
    }
    let config = builder.build().expect("valid config");

    let router = create_router(AppState::new(Arc::clone(&coordinator), config));
    (router, coordinator)
}

/// Serve a standalone coordinator on an ephemeral port and return its base URL
pub async fn spawn_coordinator() -> (String, Arc<Coordinator>) {
    let (router, coordinator) = test_router(false);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    (format!("http://{addr}"), coordinator)
}

//! Host agent tests against a live coordinator and a mocked one

mod common;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::spawn_coordinator;
use skyclaw::coordinator::{ClientConfig, CoordinatorClient};
use skyclaw::host::{HostAgent, HostConfig};

fn agent_for(url: &str) -> HostAgent {
    let config = HostConfig {
        coordinator_url: url.to_string(),
        host_name: "test-host".to_string(),
        capabilities: vec!["shell".to_string()],
        ..Default::default()
    };
    let client = CoordinatorClient::new(ClientConfig::new(url).with_retry_count(0)).unwrap();
    HostAgent::new(config).unwrap().with_client(client)
}

fn host_json(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": "test-host",
        "capabilities": ["shell"],
        "maxParallel": 1,
        "activeLeases": 0,
        "lastSeenAt": "2026-01-01T00:00:00Z",
        "registeredAt": "2026-01-01T00:00:00Z"
    })
}

#[tokio::test]
async fn test_register_records_host() {
    let (url, coordinator) = spawn_coordinator().await;
    let agent = agent_for(&url);

    let host = agent.register().await.unwrap();
    assert_eq!(host.name, "test-host");
    assert!(host.capabilities.contains("shell"));
    assert!(coordinator.state().host(&host.id).is_some());
    assert_eq!(agent.state().await.host.map(|h| h.id), Some(host.id.clone()));

    // Re-registering keeps the id
    let again = agent.register().await.unwrap();
    assert_eq!(again.id, host.id);
}

#[tokio::test]
async fn test_run_once_with_empty_queue() {
    let (url, _) = spawn_coordinator().await;
    let agent = agent_for(&url);

    assert!(agent.run_once().await.unwrap().is_none());
    assert!(agent.state().await.host.is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_once_executes_and_reports() {
    let (url, coordinator) = spawn_coordinator().await;
    let agent = agent_for(&url);
    agent.register().await.unwrap();

    let job = coordinator
        .enqueue_job(skyclaw::models::EnqueueJobRequest::new(
            common::shell_payload("sh", &["-c", "echo hi"]),
            &["shell"],
        ))
        .await
        .unwrap();

    let processed = agent.run_once().await.unwrap().expect("a job");
    assert_eq!(processed.job_id, job.id);
    assert!(processed.success);
    assert!(processed.reported);
    assert_eq!(agent.in_flight(), 0);

    let stored = coordinator.state().job(&job.id).unwrap();
    assert_eq!(stored.status, skyclaw::JobStatus::Completed);
    assert_eq!(stored.result.unwrap().stdout, "hi\n");
    assert_eq!(agent.state().await.jobs_succeeded, 1);
}

#[tokio::test]
async fn test_disallowed_command_fails_the_job() {
    let (url, coordinator) = spawn_coordinator().await;
    let agent = agent_for(&url);
    agent.register().await.unwrap();

    let job = coordinator
        .enqueue_job(common::shell_job("rm", &["shell"]))
        .await
        .unwrap();

    let processed = agent.run_once().await.unwrap().expect("a job");
    assert!(!processed.success);
    assert_eq!(processed.exit_code, 126);
    assert!(processed.reported);

    let stored = coordinator.state().job(&job.id).unwrap();
    assert_eq!(stored.status, skyclaw::JobStatus::Failed);
    assert!(stored.error.unwrap().contains("not allowed"));
    assert_eq!(agent.state().await.jobs_failed, 1);
}

#[tokio::test]
async fn test_heartbeat_reregisters_unknown_host() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/hosts/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "host": host_json("host-1") }
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/hosts/host-1/heartbeat"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "success": false,
            "error": "unknown host: host-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let agent = agent_for(&server.uri());
    agent.register().await.unwrap();

    let host = agent.heartbeat().await.unwrap();
    assert_eq!(host.id, "host-1");
}

#[tokio::test]
async fn test_failed_report_is_counted_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/hosts/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "host": host_json("host-1") }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/hosts/host-1/claim"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "job": {
                "id": "job-1",
                "createdAt": "2026-01-01T00:00:00Z",
                "updatedAt": "2026-01-01T00:00:01Z",
                "status": "leased",
                "attempts": 1,
                "leaseExpiresAt": "2026-01-01T00:01:01Z",
                "assignedHostId": "host-1",
                "requirement": { "requiredCapabilities": ["shell"] },
                "payload": { "kind": "shell", "command": "not-on-the-list" }
            } }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/jobs/job-1/complete"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "success": false,
            "error": "replication target not met: required 1 peer acks, got 0"
        })))
        .mount(&server)
        .await;

    let agent = agent_for(&server.uri());
    let processed = agent.run_once().await.unwrap().expect("a job");

    assert_eq!(processed.job_id, "job-1");
    assert!(!processed.reported);
    assert_eq!(agent.state().await.report_failures, 1);
}

#[tokio::test]
async fn test_unreachable_coordinator_fails_registration() {
    let agent = agent_for("http://127.0.0.1:9");
    assert!(agent.register().await.is_err());
}

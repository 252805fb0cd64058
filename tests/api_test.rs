//! HTTP API tests driven through the router without a socket

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{test_router, TEST_TOKEN};
use skyclaw::coordinator::peer::TOKEN_HEADER;

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(TOKEN_HEADER, TEST_TOKEN);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register(router: &Router, caps: Value) -> String {
    let (status, body) = send(
        router,
        "POST",
        "/v1/hosts/register",
        Some(json!({ "name": "runner", "capabilities": caps, "maxParallel": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["host"]["id"].as_str().unwrap().to_string()
}

async fn enqueue(router: &Router, command: &str, caps: Value) -> String {
    let (status, body) = send(
        router,
        "POST",
        "/v1/jobs",
        Some(json!({
            "payload": { "kind": "shell", "command": command },
            "requirement": { "requiredCapabilities": caps }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["job"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let (router, _) = test_router(true);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/v1/state").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/v1/state")
                .header(TOKEN_HEADER, "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_open_node_needs_no_token() {
    let (router, _) = test_router(false);

    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["nodeId"], "node-test");
}

#[tokio::test]
async fn test_full_job_lifecycle() {
    let (router, coordinator) = test_router(true);
    let host_id = register(&router, json!(["shell"])).await;
    let job_id = enqueue(&router, "echo", json!(["shell"])).await;

    let (status, body) = send(&router, "POST", &format!("/v1/hosts/{host_id}/claim"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["job"]["id"], job_id.as_str());
    assert_eq!(body["data"]["job"]["status"], "leased");

    let (status, body) = send(
        &router,
        "POST",
        &format!("/v1/jobs/{job_id}/complete"),
        Some(json!({
            "hostId": host_id,
            "success": true,
            "exitCode": 0,
            "stdout": "hello\n",
            "durationMs": 5
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["job"]["status"], "completed");

    let (status, body) = send(&router, "GET", "/v1/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["hosts"].as_array().unwrap().len(), 1);
    assert_eq!(coordinator.stats().jobs.completed, 1);
}

#[tokio::test]
async fn test_claim_with_nothing_queued_returns_null_job() {
    let (router, _) = test_router(true);
    let host_id = register(&router, json!(["shell"])).await;

    let (status, body) = send(&router, "POST", &format!("/v1/hosts/{host_id}/claim"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["success"].as_bool().unwrap());
    assert!(body["data"]["job"].is_null());
}

#[tokio::test]
async fn test_error_status_mapping() {
    let (router, _) = test_router(true);

    // Missing name
    let (status, body) = send(
        &router,
        "POST",
        "/v1/hosts/register",
        Some(json!({ "name": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    // Malformed payload
    let (status, _) = send(&router, "POST", "/v1/jobs", Some(json!({ "payload": 5 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown host
    let (status, body) = send(&router, "POST", "/v1/hosts/host-nope/claim", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("host-nope"));

    // Completing a job nobody holds
    let host_id = register(&router, json!(["shell"])).await;
    let job_id = enqueue(&router, "echo", json!([])).await;
    let (status, _) = send(
        &router,
        "POST",
        &format!("/v1/jobs/{job_id}/complete"),
        Some(json!({ "hostId": host_id, "success": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &router,
        "POST",
        "/v1/jobs/job-nope/complete",
        Some(json!({ "hostId": host_id, "success": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_heartbeat_body_is_optional() {
    let (router, coordinator) = test_router(true);
    let host_id = register(&router, json!(["shell"])).await;
    let uri = format!("/v1/hosts/{host_id}/heartbeat");

    let (status, _) = send(&router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, "POST", &uri, Some(json!({ "activeLeases": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["host"]["activeLeases"], 1);
    assert_eq!(coordinator.state().host(&host_id).unwrap().active_leases, 1);

    let (status, _) = send(&router, "POST", "/v1/hosts/host-nope/heartbeat", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_replicate_merges_and_ignores_garbage() {
    let (router, coordinator) = test_router(true);

    let (status, body) = send(
        &router,
        "POST",
        "/v1/replicate/snapshot",
        Some(json!({
            "hosts": [{
                "id": "host-remote",
                "name": "remote",
                "capabilities": ["shell"],
                "maxParallel": 2,
                "activeLeases": 0,
                "lastSeenAt": "2026-01-01T00:00:00Z",
                "registeredAt": "2026-01-01T00:00:00Z"
            }, { "id": 7 }],
            "jobs": "nope"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["changed"], true);
    assert!(coordinator.state().host("host-remote").is_some());

    let (status, body) = send(&router, "POST", "/v1/replicate/snapshot", Some(json!([1, 2]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["changed"], false);
}

#[tokio::test]
async fn test_metrics_endpoint_serves_text() {
    skyclaw::metrics::init_metrics().ok();
    let (router, _) = test_router(false);

    let response = router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

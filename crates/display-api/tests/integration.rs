//! Integration tests: enqueue, status, cancel, worker callbacks, failures, error mapping.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use display_api::server::{self, AppState};
use display_dispatch::{Dispatcher, DispatcherConfig};
use display_queue::{BrokerConfig, InMemoryBroker};
use display_store::InMemoryJobStore;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn test_app() -> (axum::Router, Arc<InMemoryBroker>) {
    let store = Arc::new(InMemoryJobStore::new());
    let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
    let config = DispatcherConfig::default().with_publish_retries(2, Duration::ZERO);
    let dispatcher = Dispatcher::new(store, broker.clone(), config);
    let state = Arc::new(AppState { dispatcher });
    (server::router(state), broker)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    let j: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, j)
}

async fn enqueue(app: &axum::Router, source: &str) -> String {
    let (status, j) = send(
        app,
        "POST",
        "/enqueue",
        Some(json!({ "job_type": "image", "source": source })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    j["data"]["job_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_ok() {
    let (app, _) = test_app();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn enqueue_then_job_and_queue_status() {
    let (app, _) = test_app();
    let (status, j) = send(
        &app,
        "POST",
        "/enqueue",
        Some(json!({
            "job_type": "slideshow",
            "source": "smb://media/holiday",
            "target_device": "lobby",
            "priority": 7
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["code"], 200);
    assert_eq!(j["data"]["state"], "QUEUED");
    let id = j["data"]["job_id"].as_str().unwrap().to_string();

    let (status, j) = send(&app, "GET", &format!("/job/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["id"], id.as_str());
    assert_eq!(j["data"]["state"], "QUEUED");
    assert_eq!(j["data"]["priority"], 7);
    assert_eq!(j["data"]["payload"]["target_device"], "lobby");
    let history = j["data"]["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);

    let (status, j) = send(&app, "GET", "/queue/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["pending_count"], 0);
    assert_eq!(j["data"]["queued_count"], 1);
    assert_eq!(j["data"]["running_count"], 0);
    assert_eq!(j["data"]["queue_depth"], 1);
}

#[tokio::test]
async fn bad_requests_are_invalid_payload() {
    let (app, _) = test_app();
    let req = Request::builder()
        .method("POST")
        .uri("/enqueue")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    let j: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(j["code"], 400);
    assert_eq!(j["data"]["kind"], "invalid_payload");

    let (status, j) = send(
        &app,
        "POST",
        "/enqueue",
        Some(json!({ "job_type": "image", "source": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["data"]["kind"], "invalid_payload");

    let (status, _) = send(
        &app,
        "POST",
        "/enqueue",
        Some(json!({ "job_type": "hologram", "source": "a.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, j) = send(&app, "GET", "/job/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["data"]["kind"], "invalid_payload");

    // Nothing was persisted.
    let (_, j) = send(&app, "GET", "/queue/status", None).await;
    assert_eq!(j["data"]["queued_count"], 0);
    assert_eq!(j["data"]["queue_depth"], 0);
}

#[tokio::test]
async fn unknown_job_is_404() {
    let (app, _) = test_app();
    let id = "6f1c1f1e-7c56-4a86-9d3e-3c6a2f3b9b10";
    let (status, j) = send(&app, "GET", &format!("/job/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(j["data"]["kind"], "not_found");
    assert_eq!(j["data"]["job_id"], id);

    let (status, _) = send(&app, "DELETE", &format!("/job/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_queued_job_is_idempotent() {
    let (app, _) = test_app();
    let id = enqueue(&app, "a.png").await;

    let (status, j) = send(&app, "DELETE", &format!("/job/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["state"], "CANCELLED");

    let (status, j) = send(&app, "DELETE", &format!("/job/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["state"], "CANCELLED");

    let (_, j) = send(&app, "GET", "/queue/status", None).await;
    assert_eq!(j["data"]["queued_count"], 0);
}

#[tokio::test]
async fn idempotency_key_replays_or_conflicts() {
    let (app, _) = test_app();
    let body = json!({ "job_type": "video", "source": "clip.mp4", "idempotency_key": "k-1" });
    let (_, first) = send(&app, "POST", "/enqueue", Some(body.clone())).await;
    let (status, second) = send(&app, "POST", "/enqueue", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["job_id"], second["data"]["job_id"]);

    let (status, j) = send(
        &app,
        "POST",
        "/enqueue",
        Some(json!({ "job_type": "video", "source": "other.mp4", "idempotency_key": "k-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(j["data"]["kind"], "conflict");
}

#[tokio::test]
async fn worker_callbacks_drive_job_to_terminal() {
    let (app, _) = test_app();
    let id = enqueue(&app, "a.png").await;

    let (status, j) = send(
        &app,
        "POST",
        &format!("/job/{id}/transition"),
        Some(json!({ "from": "QUEUED", "to": "RUNNING", "attempt": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["state"], "RUNNING");
    assert_eq!(j["data"]["attempt"], 1);

    // Stale expectation loses the compare-and-swap.
    let (status, j) = send(
        &app,
        "POST",
        &format!("/job/{id}/transition"),
        Some(json!({ "from": "QUEUED", "to": "RUNNING" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(j["data"]["kind"], "state_conflict");

    let (status, j) = send(
        &app,
        "POST",
        &format!("/job/{id}/complete"),
        Some(json!({ "outcome": "succeeded" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["state"], "SUCCEEDED");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/job/{id}/complete"),
        Some(json!({ "outcome": "succeeded" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, j) = send(
        &app,
        "POST",
        &format!("/job/{id}/complete"),
        Some(json!({ "outcome": "failed", "error": "late" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(j["data"]["kind"], "invalid_transition");
}

#[tokio::test]
async fn transition_to_queue_only_state_is_rejected() {
    let (app, _) = test_app();
    let id = enqueue(&app, "a.png").await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/job/{id}/transition"),
        Some(json!({ "from": "QUEUED", "to": "PENDING" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn failures_most_recent_first_with_limit() {
    let (app, _) = test_app();
    let mut ids = Vec::new();
    for n in 0..3 {
        let id = enqueue(&app, &format!("{n}.png")).await;
        send(
            &app,
            "POST",
            &format!("/job/{id}/transition"),
            Some(json!({ "from": "QUEUED", "to": "RUNNING", "attempt": 1 })),
        )
        .await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/job/{id}/complete"),
            Some(json!({ "outcome": "failed", "error": format!("decoder crashed {n}") })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        ids.push(id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, j) = send(&app, "GET", "/failures", None).await;
    assert_eq!(status, StatusCode::OK);
    let failed = j["data"].as_array().unwrap();
    assert_eq!(failed.len(), 3);
    assert_eq!(failed[0]["id"], ids[2].as_str());
    assert_eq!(failed[0]["error"], "decoder crashed 2");
    assert_eq!(failed[2]["id"], ids[0].as_str());

    let (_, j) = send(&app, "GET", "/failures?limit=1", None).await;
    let failed = j["data"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["id"], ids[2].as_str());

    let (_, j) = send(&app, "GET", "/failures?since=2999-01-01T00:00:00Z", None).await;
    assert!(j["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn broker_down_is_503_and_job_failed() {
    let (app, broker) = test_app();
    broker.close().await;

    let (status, j) = send(
        &app,
        "POST",
        "/enqueue",
        Some(json!({ "job_type": "image", "source": "a.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(j["code"], 503);
    assert_eq!(j["data"]["kind"], "dispatch_failure");
    let id = j["data"]["job_id"].as_str().unwrap().to_string();

    let (_, j) = send(&app, "GET", &format!("/job/{id}"), None).await;
    assert_eq!(j["data"]["state"], "FAILED");
    assert_eq!(j["data"]["error"], "dispatch failure");

    let (_, j) = send(&app, "GET", "/failures", None).await;
    assert_eq!(j["data"].as_array().unwrap().len(), 1);
}

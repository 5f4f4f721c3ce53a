mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::{url, Harness, HarnessBuilder, USER};
use reply_agent::{build_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn router(h: &Harness) -> Router {
    build_router(AppState::new(h.batches.clone(), h.actions.clone(), 100))
}

async fn call(app: &Router, method: Method, uri: &str, user: Option<i64>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        req = req.header("x-user-id", user.to_string());
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_needs_no_user() {
    let h = HarnessBuilder::default().build().await;
    let (status, body) = call(&router(&h), Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_user_header_is_unauthorized() {
    let h = HarnessBuilder::default().build().await;
    let (status, body) = call(&router(&h), Method::GET, "/api/queue", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn start_then_status() {
    let h = HarnessBuilder::default().build().await;
    let app = router(&h);
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/batch/start",
        Some(USER),
        Some(json!({"urls": [url(1), url(2)], "tone": "witty"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["run_id"].is_string());

    h.batches.wait_finished(USER).await;
    let (status, body) = call(&app, Method::GET, "/api/batch/status", Some(USER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["cursor"], 2);

    let (_, queue) = call(&app, Method::GET, "/api/queue", Some(USER), None).await;
    assert_eq!(queue.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_tone_is_bad_request() {
    let h = HarnessBuilder::default().build().await;
    let (status, body) = call(
        &router(&h),
        Method::POST,
        "/api/batch/start",
        Some(USER),
        Some(json!({"urls": [url(1)], "tone": "sarcastic"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(h.batches.status(USER).status, reply_agent::model::RunStatus::Idle);
}

#[tokio::test]
async fn exhausted_quota_is_429() {
    let h = HarnessBuilder::default().cap(0).build().await;
    let (status, body) = call(
        &router(&h),
        Method::POST,
        "/api/batch/start",
        Some(USER),
        Some(json!({"urls": [url(1)]})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "quota_exceeded");
}

#[tokio::test]
async fn payment_required_carries_requirements() {
    let requirements = json!({"scheme": "exact", "network": "base", "amount": "10000"});
    let h = HarnessBuilder::default()
        .payment(false, requirements.clone())
        .build()
        .await;
    let (status, body) = call(
        &router(&h),
        Method::POST,
        "/api/batch/start",
        Some(USER),
        Some(json!({"urls": [url(1)], "payment_proof": {"sig": "bad"}})),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["code"], "payment_required");
    assert_eq!(body["error"]["requirements"], requirements);
}

#[tokio::test]
async fn queue_round_trip_over_http() {
    let h = HarnessBuilder::default().build().await;
    let app = router(&h);

    let (status, entry) = call(
        &app,
        Method::POST,
        "/api/queue",
        Some(USER),
        Some(json!({"url": url(55), "reply_text": "first take"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = entry["id"].as_i64().unwrap();

    let (status, edited) = call(
        &app,
        Method::PUT,
        &format!("/api/queue/{}", id),
        Some(USER),
        Some(json!({"reply_text": "second take"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["reply_text"], "second take");

    let (status, record) = call(&app, Method::POST, &format!("/api/queue/{}/approve", id), Some(USER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "published");
    assert_eq!(record["reply_text"], "second take");

    let (status, body) = call(&app, Method::POST, &format!("/api/queue/{}/approve", id), Some(USER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (_, history) = call(&app, Method::GET, "/api/history", Some(USER), None).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    let (_, stats) = call(&app, Method::GET, "/api/stats?days=3", Some(USER), None).await;
    let stats = stats.as_array().unwrap();
    assert_eq!(stats.len(), 3);
    assert_eq!(stats[2]["publish_count"], 1);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let h = HarnessBuilder::default().build().await;
    let app = router(&h);
    let entry = h.actions.add(USER, &url(3), "bye", None).await.unwrap();
    let uri = format!("/api/queue/{}", entry.id);

    let (status, body) = call(&app, Method::DELETE, &uri, Some(USER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"id": entry.id, "deleted": true}));

    let (status, body) = call(&app, Method::DELETE, &uri, Some(USER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], false);
}

#[tokio::test]
async fn logs_poll_returns_only_newer_records() {
    let h = HarnessBuilder::default().build().await;
    let app = router(&h);
    h.journal.info(USER, "one").await;
    h.journal.info(USER, "two").await;
    h.journal.info(USER + 1, "someone else").await;

    let (status, logs) = call(&app, Method::GET, "/api/logs", Some(USER), None).await;
    assert_eq!(status, StatusCode::OK);
    let logs = logs.as_array().unwrap().clone();
    assert_eq!(logs.len(), 2);
    let first_id = logs[0]["id"].as_i64().unwrap();

    let (_, newer) = call(
        &app,
        Method::GET,
        &format!("/api/logs?since_id={}", first_id),
        Some(USER),
        None,
    )
    .await;
    let newer = newer.as_array().unwrap();
    assert_eq!(newer.len(), 1);
    assert_eq!(newer[0]["message"], "two");
    assert_eq!(newer[0]["level"], "info");
}

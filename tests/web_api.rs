//! HTTP surface tests driven through the router with `tower::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{app_state, harness, wait_terminal, MockRunner};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn router(h: &common::Harness) -> Router {
    owl_gateway::web::build_router(app_state(h))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

#[tokio::test]
async fn health_reports_online() {
    let h = harness(MockRunner::Instant);
    let response = router(&h).oneshot(get("/")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "online");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn submit_then_fetch_round_trips_the_result() {
    let h = harness(MockRunner::Instant);
    let app = router(&h);

    let response = app
        .clone()
        .oneshot(post_json("/api/run/async", json!({"question": "what is 2+2"})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "processing");
    let task_id: Uuid = body["task_id"].as_str().expect("task_id").parse().expect("uuid");

    wait_terminal(&h.registry, task_id).await;
    let response = app
        .oneshot(get(&format!("/api/run/task/{task_id}")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["answer"], "echo: what is 2+2");
    assert_eq!(body["result"]["chat_history"][0]["role"], "assistant");
    assert_eq!(
        body["result"]["chat_history"][0]["content"],
        "echo: what is 2+2"
    );
    assert_eq!(body["result"]["token_info"]["completion_tokens"], 7);
}

#[tokio::test]
async fn two_submissions_get_distinct_ids() {
    let h = harness(MockRunner::Instant);
    let app = router(&h);
    let mut ids = Vec::new();
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_json("/api/run/async", json!({"question": "hi"})))
            .await
            .expect("response");
        ids.push(body_json(response).await["task_id"].as_str().expect("id").to_string());
    }
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn unknown_task_is_404() {
    let h = harness(MockRunner::Instant);
    let response = router(&h)
        .oneshot(get(&format!("/api/run/task/{}", Uuid::new_v4())))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "task_not_found");
}

#[tokio::test]
async fn cancel_unknown_task_is_404() {
    let h = harness(MockRunner::Instant);
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/run/task/{}", Uuid::new_v4()))
        .body(Body::empty())
        .expect("request");
    let response = router(&h).oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_finished_task_is_rejected() {
    let h = harness(MockRunner::Instant);
    let app = router(&h);
    let response = app
        .clone()
        .oneshot(post_json("/api/run/async", json!({"question": "quick"})))
        .await
        .expect("response");
    let task_id: Uuid = body_json(response).await["task_id"]
        .as_str()
        .expect("id")
        .parse()
        .expect("uuid");
    wait_terminal(&h.registry, task_id).await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/run/task/{task_id}"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_clips_long_queries_for_display() {
    let h = harness(MockRunner::Instant);
    let id = Uuid::new_v4();
    h.registry.create(id, "x".repeat(500), "run");

    let response = router(&h)
        .oneshot(get("/api/run/tasks?limit=5"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    let preview = body["tasks"][0]["query"].as_str().expect("query");
    assert_eq!(preview.chars().count(), 103);
    assert!(preview.ends_with("..."));
}

#[tokio::test]
async fn list_filters_by_status_and_rejects_garbage() {
    let h = harness(MockRunner::Instant);
    let app = router(&h);
    h.registry.create(Uuid::new_v4(), "still going", "run");

    let response = app
        .clone()
        .oneshot(get("/api/run/tasks?status=processing"))
        .await
        .expect("response");
    assert_eq!(body_json(response).await["count"], 1);

    let response = app
        .clone()
        .oneshot(get("/api/run/tasks?status=completed"))
        .await
        .expect("response");
    assert_eq!(body_json(response).await["count"], 0);

    let response = app
        .oneshot(get("/api/run/tasks?status=bogus"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn module_catalog_is_browsable() {
    let h = harness(MockRunner::Instant);
    let app = router(&h);

    let response = app.clone().oneshot(get("/api/modules")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<&str> = body["modules"]
        .as_array()
        .expect("modules")
        .iter()
        .map(|m| m["name"].as_str().expect("name"))
        .collect();
    assert!(names.contains(&"run"));
    assert!(names.contains(&"run_mini"));

    let response = app
        .clone()
        .oneshot(get("/api/modules/run_mini"))
        .await
        .expect("response");
    let body = body_json(response).await;
    assert_eq!(body["requires_visible_browser"], true);

    let response = app
        .oneshot(get("/api/modules/run_imaginary"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn module_default_substitution_goes_to_the_browser_pool() {
    let h = harness(MockRunner::Instant);
    let response = router(&h)
        .oneshot(post_json(
            "/api/run/async",
            json!({"question": "ignored text", "module": "run_mini", "use_module_default": true}),
        ))
        .await
        .expect("response");
    let task_id: Uuid = body_json(response).await["task_id"]
        .as_str()
        .expect("id")
        .parse()
        .expect("uuid");

    wait_terminal(&h.registry, task_id).await;
    // The caller's text stays on the entry even though the module default ran.
    assert_eq!(h.registry.get(task_id).expect("entry").query, "ignored text");
    assert_eq!(h.browser.submissions.lock().len(), 1);
}

//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use flight_cache::{
    api::create_router,
    cache::{CacheEngine, DurableStore, FileStore, MemoryStore, DEFAULT_MAX_AGE},
    clock::ManualClock,
    AppState,
};
use serde_json::{json, Value};
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_app() -> Router {
    let cache = CacheEngine::new(Arc::new(MemoryStore::new()));
    create_router(AppState::new(cache))
}

fn create_app_with(durable: Arc<dyn DurableStore>, clock: Arc<ManualClock>) -> Router {
    let cache = CacheEngine::with_clock(durable, clock, DEFAULT_MAX_AGE);
    create_router(AppState::new(cache))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn put_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

// == SET Endpoint Tests ==

#[tokio::test]
async fn test_set_endpoint_success() {
    let app = create_test_app();

    let response = app
        .oneshot(put_json("/set", r#"{"key":"test_key","value":"test_value"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert!(json["message"].as_str().unwrap().contains("test_key"));
}

#[tokio::test]
async fn test_set_endpoint_with_max_age() {
    let app = create_test_app();

    let response = app
        .oneshot(put_json(
            "/set",
            r#"{"key":"ttl_key","value":"ttl_value","max_age_ms":60000}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// == GET Endpoint Tests ==

#[tokio::test]
async fn test_get_endpoint_returns_structured_value() {
    let app = create_test_app();

    let set_response = app
        .clone()
        .oneshot(put_json(
            "/set",
            r#"{"key":"p:1","value":{"id":1,"rating":4,"tags":["new"]}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(set_response.status(), StatusCode::OK);

    let get_response = app.oneshot(get("/get/p:1")).await.unwrap();

    assert_eq!(get_response.status(), StatusCode::OK);
    let json = body_to_json(get_response.into_body()).await;
    assert_eq!(json["key"], "p:1");
    assert_eq!(json["value"], json!({"id": 1, "rating": 4, "tags": ["new"]}));
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let app = create_test_app();

    let response = app.oneshot(get("/get/nonexistent_key")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("not available"));
}

// == HAS Endpoint Tests ==

#[tokio::test]
async fn test_has_endpoint() {
    let app = create_test_app();

    app.clone()
        .oneshot(put_json("/set", r#"{"key":"here","value":1}"#))
        .await
        .unwrap();

    let present = body_to_json(app.clone().oneshot(get("/has/here")).await.unwrap().into_body()).await;
    let absent = body_to_json(app.oneshot(get("/has/gone")).await.unwrap().into_body()).await;

    assert_eq!(present["exists"], true);
    assert_eq!(absent["exists"], false);
}

// == STATS Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let app = create_test_app();

    // Set a value
    let _ = app
        .clone()
        .oneshot(put_json("/set", r#"{"key":"stats_key","value":"stats_value"}"#))
        .await
        .unwrap();

    // Get (hit)
    let _ = app.clone().oneshot(get("/get/stats_key")).await.unwrap();

    // Get (miss)
    let _ = app.clone().oneshot(get("/get/nonexistent")).await.unwrap();

    let response = app.oneshot(get("/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;

    assert_eq!(json["memory_hits"].as_u64().unwrap(), 1);
    assert_eq!(json["misses"].as_u64().unwrap(), 1);
    assert_eq!(json["total_entries"].as_u64().unwrap(), 1);
    assert_eq!(json["in_flight"].as_u64().unwrap(), 0);
    assert!(json.get("hit_rate").is_some());
}

// == HEALTH Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"].as_str().unwrap(), "healthy");
    assert!(json.get("timestamp").is_some());
}

// == Error Response Tests ==

#[tokio::test]
async fn test_invalid_json_request() {
    let app = create_test_app();

    let response = app
        .oneshot(put_json("/set", r#"{"invalid json"#))
        .await
        .unwrap();

    // Axum returns 422 for JSON parsing errors by default
    assert!(
        response.status() == StatusCode::BAD_REQUEST
            || response.status() == StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[tokio::test]
async fn test_empty_key_request() {
    let app = create_test_app();

    let response = app
        .oneshot(put_json("/set", r#"{"key":"","value":"test"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json.get("error").is_some());
}

// == Expiry via API Tests ==

#[tokio::test]
async fn test_expiry_via_api() {
    let clock = Arc::new(ManualClock::new(0));
    let app = create_app_with(Arc::new(MemoryStore::new()), clock.clone());

    let set_response = app
        .clone()
        .oneshot(put_json(
            "/set",
            r#"{"key":"p:1","value":{"id":1,"rating":4},"max_age_ms":1000}"#,
        ))
        .await
        .unwrap();
    assert_eq!(set_response.status(), StatusCode::OK);

    clock.set(500);
    let get_response = app.clone().oneshot(get("/get/p:1")).await.unwrap();
    assert_eq!(get_response.status(), StatusCode::OK);

    clock.advance(Duration::from_millis(1000));
    let get_response = app.oneshot(get("/get/p:1")).await.unwrap();
    assert_eq!(get_response.status(), StatusCode::NOT_FOUND);
}

// == Durable Store via API Tests ==

#[tokio::test]
async fn test_value_survives_restart_with_file_store() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));

    let before = create_app_with(Arc::new(FileStore::new(temp_dir.path())), clock.clone());
    let set_response = before
        .oneshot(put_json("/set", r#"{"key":"durable","value":{"a":{"b":[1,2,3]}}}"#))
        .await
        .unwrap();
    assert_eq!(set_response.status(), StatusCode::OK);

    // A fresh engine over the same directory stands in for a restarted process.
    let after = create_app_with(Arc::new(FileStore::new(temp_dir.path())), clock);
    let get_response = after.clone().oneshot(get("/get/durable")).await.unwrap();

    assert_eq!(get_response.status(), StatusCode::OK);
    let json = body_to_json(get_response.into_body()).await;
    assert_eq!(json["value"], json!({"a": {"b": [1, 2, 3]}}));

    let stats = body_to_json(after.oneshot(get("/stats")).await.unwrap().into_body()).await;
    assert_eq!(stats["durable_hits"].as_u64().unwrap(), 1);
    assert_eq!(stats["total_entries"].as_u64().unwrap(), 0);
}

#[tokio::test]
async fn test_long_key_survives_restart_with_file_store() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let key = "k".repeat(200);

    let before = create_app_with(Arc::new(FileStore::new(temp_dir.path())), clock.clone());
    let body = json!({"key": key, "value": {"long": true}}).to_string();
    let set_response = before.clone().oneshot(put_json("/set", &body)).await.unwrap();
    assert_eq!(set_response.status(), StatusCode::OK);

    let stats = body_to_json(before.oneshot(get("/stats")).await.unwrap().into_body()).await;
    assert_eq!(stats["durable_errors"].as_u64().unwrap(), 0);

    let after = create_app_with(Arc::new(FileStore::new(temp_dir.path())), clock);
    let get_response = after.oneshot(get(&format!("/get/{}", key))).await.unwrap();

    assert_eq!(get_response.status(), StatusCode::OK);
    let json = body_to_json(get_response.into_body()).await;
    assert_eq!(json["value"], json!({"long": true}));
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use serial_test::serial;
use tower::ServiceExt;

use wos_core::admin::AdminClassifier;
use wos_core::api::{configure_api_routes, AppState};
use wos_core::dispatcher::{Dispatcher, DispatcherConfig};
use wos_core::equipment::EquipmentRegistry;
use wos_core::event_bus::EventBus;
use wos_core::model_client::{MockModelClient, ModelClient};
use wos_core::qa::QaPolicy;
use wos_core::queue::Queue;
use wos_core::rate_limit::RateLimiter;
use wos_core::store::sqlite::SqliteStore;
use wos_core::store::WorkOrderStore;
use wos_utils::config::Settings;

async fn test_state() -> (AppState, tempfile::TempDir) {
    test_state_with_rate_limit(None).await
}

/// Builds an `AppState` wired against a fresh embedded store, optionally
/// overriding the rate limiter budget (`requests`, `window_s`) so a single
/// test can exercise rejection without every other test inheriting a tight
/// budget from `default.toml`.
async fn test_state_with_rate_limit(rate_limit_override: Option<(u32, u64)>) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("wos-api-test.sqlite3");
    let store: Arc<dyn WorkOrderStore> = Arc::new(
        SqliteStore::open(path.to_str().unwrap())
            .await
            .expect("open sqlite store"),
    );

    let settings = Settings::new(None).expect("load default settings");
    let admin = Arc::new(AdminClassifier::new(EquipmentRegistry::new()));
    let (requests, window_s) = rate_limit_override.unwrap_or((settings.rate_limit.requests, settings.rate_limit.window_s));
    let rate_limiter = Arc::new(RateLimiter::new(requests, window_s as i64));

    let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
    for tier in settings.tier_model_table.keys() {
        clients.insert(tier.clone(), Arc::new(MockModelClient::new("mock output".to_string())));
    }

    let dispatcher_config = DispatcherConfig {
        workers: 1,
        max_in_flight: 10,
        backoff_base_s: 0,
        backoff_cap_s: 1,
        block_timeout: Duration::from_millis(20),
        idle_claim_threshold: Duration::from_secs(300),
        qa_policy: QaPolicy {
            allow_command_checks: false,
            sandbox_timeout_s: 10,
            strict_mode: false,
        },
    };

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        Queue::new(),
        EventBus::new(),
        settings.escalation.ladder.clone(),
        EquipmentRegistry::new(),
        clients,
        settings.tier_model_table.clone(),
        dispatcher_config,
    ));

    let state = AppState::new(store, dispatcher, admin, rate_limiter, Arc::new(settings));
    (state, dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is valid json")
}

#[tokio::test]
#[serial]
async fn healthz_reports_sqlite_fallback_backend() {
    let (state, _dir) = test_state().await;
    let app = configure_api_routes(state);

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/healthz")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["backend"], "sqlite-fallback");
}

#[tokio::test]
#[serial]
async fn create_then_get_work_order_round_trips() {
    let (state, _dir) = test_state().await;
    let app = configure_api_routes(state);

    let create_response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/work-orders")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    json!({ "raw_message": "please echo hello" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(create_response.status(), axum::http::StatusCode::ACCEPTED);
    let created = body_json(create_response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["owner"], "intern");

    let get_response = app
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("/work-orders/{id}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(get_response.status(), axum::http::StatusCode::OK);
    let fetched = body_json(get_response).await;
    assert_eq!(fetched["id"], id);
    assert_eq!(fetched["status"], "queued");
}

#[tokio::test]
#[serial]
async fn create_work_order_rejects_empty_message() {
    let (state, _dir) = test_state().await;
    let app = configure_api_routes(state);

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/work-orders")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(json!({ "raw_message": "   " }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn rate_limiter_rejects_requests_past_the_configured_budget() {
    let (state, _dir) = test_state_with_rate_limit(Some((1, 60))).await;
    let app = configure_api_routes(state);

    let make_request = || {
        axum::http::Request::builder()
            .method("POST")
            .uri("/work-orders")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json!({ "raw_message": "hello" }).to_string()))
            .unwrap()
    };

    let first = app.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(first.status(), axum::http::StatusCode::ACCEPTED);

    let second = app.oneshot(make_request()).await.unwrap();
    assert_eq!(second.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
}

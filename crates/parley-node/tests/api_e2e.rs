//! End-to-end tests for the HTTP surface: health, stats, users and the
//! authorization step of the WebSocket endpoint.

use axum::{body::Body, http::Request, http::StatusCode};
use parley_hub::Hub;
use parley_node::api::{create_router, AppState};
use parley_node::config::NodeConfig;
use serde_json::{json, Value};
use tower::ServiceExt;

fn create_test_app() -> axum::Router {
    let config = NodeConfig::default();
    let (hub, handle) = Hub::new(config.mailbox_size);
    tokio::spawn(hub.run());
    create_router(AppState::from_config(&config, handle))
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn upgrade_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_list_users() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::get("/api/users").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!([
            {"id": 1, "name": "Clement"},
            {"id": 2, "name": "LockStar"}
        ])
    );
}

#[tokio::test]
async fn test_stats_start_empty() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::get("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats = json_body(response).await;
    assert_eq!(stats["current_connections"], 0);
    assert_eq!(stats["active_clients"], json!([]));
    assert_eq!(stats["total_broadcasts"], 0);
}

#[tokio::test]
async fn test_unknown_user_is_rejected_before_upgrade() {
    let app = create_test_app();

    let response = app
        .oneshot(upgrade_request("/ws/chat?id=99"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("99"));
}

#[tokio::test]
async fn test_missing_or_bad_id_is_bad_request() {
    let app = create_test_app();

    let response = app
        .clone()
        .oneshot(upgrade_request("/ws/chat"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(upgrade_request("/ws/chat?id=abc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_known_user_without_upgrade_headers() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::get("/ws/chat?id=1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_client_error());
    assert_ne!(response.status(), StatusCode::FORBIDDEN);
}

//! HTTP API for the Parley node.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parley_hub::{HubHandle, HubStats, KeepaliveConfig, UserDirectory, UserEntry};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::NodeConfig;
use crate::ws::ws_handler;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Users allowed to connect.
    pub directory: Arc<UserDirectory>,
    /// Keepalive settings applied to each connection.
    pub keepalive: KeepaliveConfig,
    /// Slots in each client's outbound queue.
    pub outbound_capacity: usize,
}

impl AppState {
    /// Build state from configuration and a hub handle.
    pub fn from_config(config: &NodeConfig, hub: HubHandle) -> Self {
        Self {
            hub,
            directory: Arc::new(config.directory()),
            keepalive: config.keepalive(),
            outbound_capacity: config.outbound_capacity,
        }
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("user not found: {0}")]
    UnknownUser(i64),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownUser(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws/chat", get(ws_handler))
        .route("/api/stats", get(get_stats))
        .route("/api/users", get(list_users))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}

async fn list_users(State(state): State<AppState>) -> Json<Vec<UserEntry>> {
    Json(state.directory.entries())
}

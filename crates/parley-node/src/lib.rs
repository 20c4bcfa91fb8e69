//! # Parley Node
//!
//! WebSocket chat relay built on [`parley_hub`].
//!
//! ## Endpoints
//!
//! - `GET /ws/chat?id=<id>` - WebSocket upgrade for a user in the directory
//! - `GET /api/stats` - Hub statistics
//! - `GET /api/users` - Users allowed to connect
//! - `GET /health` - Liveness check
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin parley-node -- --listen-addr 127.0.0.1:8080
//! ```
//!
//! ## Example: Serving the Router
//!
//! ```rust,no_run
//! use parley_hub::Hub;
//! use parley_node::api::{create_router, AppState};
//! use parley_node::config::NodeConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = NodeConfig::default();
//! let (hub, handle) = Hub::new(config.mailbox_size);
//! tokio::spawn(hub.run());
//!
//! let app = create_router(AppState::from_config(&config, handle));
//! let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod observability;
pub mod ws;

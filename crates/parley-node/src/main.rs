//! Parley Node - WebSocket chat relay.

use anyhow::Context;
use clap::Parser;
use parley_hub::Hub;
use parley_node::api::{create_router, AppState};
use parley_node::config::NodeConfig;
use parley_node::observability::{init_logging, LogFormat};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Parley Node - real-time chat relay
#[derive(Parser, Debug)]
#[command(name = "parley-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(addr) = args.listen_addr {
        config.listen_addr = addr;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(format) = args.log_format {
        config.log_format = format;
    }

    init_logging(&config.log_level, LogFormat::parse(&config.log_format));

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Parley node");
    tracing::info!(
        listen_addr = %config.listen_addr,
        users = config.users.len(),
        liveness_window_secs = config.liveness_window_secs,
        outbound_capacity = config.outbound_capacity,
        "Node configuration"
    );

    let (hub, handle) = Hub::new(config.mailbox_size);
    tokio::spawn(hub.run());

    let app = create_router(AppState::from_config(&config, handle));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;

    tracing::info!("Node is ready. Press Ctrl+C to stop.");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("Parley node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

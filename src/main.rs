//! Capture proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                  CAPTURE PROXY                   │
//!   Client Request     │  ┌────────┐   ┌──────────────┐   ┌────────────┐  │
//!   ───────────────────┼─▶│  http  │──▶│   pipeline   │──▶│  upstream  │──┼──▶ Tenant
//!                      │  │ server │   │ pre_request  │   │  (reqwest) │  │    Upstream
//!                      │  └────────┘   │ pre_forward  │   └─────┬──────┘  │
//!                      │               └──────┬───────┘         │         │
//!                      │        session/ ◀────┤  tenant/ ◀──────┤         │
//!   Client Response    │               ┌──────▼───────┐         │         │
//!   ◀──────────────────┼───────────────│post_response │◀────────┘         │
//!                      │               │   cleanup    │                   │
//!                      │               └──────┬───────┘                   │
//!                      │                      ▼ (queue, non-blocking)     │
//!                      │               ┌──────────────┐                   │
//!                      │               │   capture    │──▶ store, events  │
//!                      │               │    worker    │                   │
//!                      │               └──────────────┘                   │
//!                      └──────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use capture_proxy::config::{load_config, ConfigWatcher, ProxyConfig};
use capture_proxy::lifecycle::{wait_for_signal, Shutdown};
use capture_proxy::observability::{logging, metrics};
use capture_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "capture-proxy")]
#[command(about = "Multi-tenant capturing reverse proxy", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long, env = "CAPTURE_PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "capture-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        environments = config.tenants.environments.len(),
        capture_enabled = config.capture.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher handle alive for the life of the process.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), rx),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (None, rx)
                }
            }
        }
        None => (None, tokio::sync::mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    HttpServer::new(config)
        .run(listener, config_updates, shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

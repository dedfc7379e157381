//! Murmur relay daemon
//!
//! Listens on a Unix socket, validates and rebuilds chat request chains,
//! forwards them to the configured chat-completion provider, and streams
//! the reply back as NDJSON.

mod server;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use murmur_core::{load_config, load_config_from_path};
use server::{RelayServer, ServerConfig};

/// Relay daemon for murmur chat
#[derive(Debug, Parser)]
#[command(name = "murmur-relayd", version, about)]
struct Args {
    /// Unix socket path to listen on (overrides config)
    #[arg(long, env = "MURMUR_SOCKET")]
    socket: Option<PathBuf>,

    /// Configuration file path (default: ~/.config/murmur/murmur.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Attach processing traces to reply envelopes
    #[arg(long)]
    debug_traces: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match args.config {
        Some(path) => load_config_from_path(Some(path)).context("Failed to load configuration")?,
        None => load_config().context("Failed to load configuration")?,
    };
    if let Some(socket) = args.socket {
        config.socket_path = Some(socket);
    }
    if config.api_key.is_empty() {
        warn!("No API key configured; upstream requests will likely be rejected");
    }

    let socket_path = config.relay_socket_path();
    let server_config = ServerConfig {
        debug_traces: args.debug_traces,
        ..ServerConfig::default()
    };
    let mut server = RelayServer::new(socket_path.clone(), config, server_config);

    // Signal handling: both SIGINT and SIGTERM request shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
            shutdown.store(true, Ordering::SeqCst);
        });
    }

    info!(socket = %socket_path.display(), "Starting murmur relay daemon");
    server.run(shutdown).await
}

//! Murmur terminal client
//!
//! Streams chat with a reasoning-capable model, either directly against
//! the configured provider or through the local relay daemon.

mod app;
mod backend;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use murmur_core::{load_config, load_config_from_path, PromptSelection};

use app::App;
use backend::{connect, ChatConnection};

/// Terminal client for murmur chat
#[derive(Debug, Parser)]
#[command(name = "murmur", version, about)]
struct Args {
    /// Talk through the local relay daemon instead of the provider
    #[arg(long)]
    relay: bool,

    /// Relay socket path (implies --relay)
    #[arg(long, env = "MURMUR_SOCKET")]
    socket: Option<PathBuf>,

    /// Model identifier (overrides config)
    #[arg(long, env = "MURMUR_MODEL")]
    model: Option<String>,

    /// System prompt preset key (default, math, code, creative)
    #[arg(long, default_value = "default")]
    preset: String,

    /// Configuration file path (default: ~/.config/murmur/murmur.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they never interleave with the chat
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match args.config {
        Some(path) => load_config_from_path(Some(path)).context("Failed to load configuration")?,
        None => load_config().context("Failed to load configuration")?,
    };
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(socket) = args.socket.clone() {
        config.socket_path = Some(socket);
    }

    let connection = if args.relay || args.socket.is_some() {
        ChatConnection::Relay {
            socket_path: config.relay_socket_path(),
        }
    } else {
        ChatConnection::Direct
    };
    let backend = connect(&connection, &config);

    let selection = PromptSelection::preset(args.preset);
    App::new(backend, config, selection).run().await
}

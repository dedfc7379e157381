//! Relay Server Implementation
//!
//! This module provides the core server loop for the murmur relay:
//! - Accepts connections on a Unix socket
//! - Spawns a handler task per connection
//! - Rejects peers running as a different user
//! - Supports graceful shutdown
//!
//! # Wire Protocol
//!
//! Each connection carries exactly one request: a single line of JSON
//! (a `RelayRequest`), answered with either
//!
//! - a stream of `{"content": "..."}` NDJSON lines followed by
//!   connection close (streaming success), or
//! - a single `RelayResponse` envelope line (errors, and success when
//!   streaming is disabled).
//!
//! ```text
//!                     RelayServer
//!                          │
//!          ┌───────────────┼───────────────┐
//!          │               │               │
//!      client 1        client 2        client 3
//!          │               │               │
//!          └───────────────┴───────────────┘
//!                          │
//!                   UpstreamClient
//!              (chat-completion provider)
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use murmur_core::{
    chunk_marked_text, chunk_plain_text, client_facing_message, prepare_chain, ChatConfig,
    RelayRequest, RelayResponse, UpstreamClient, UpstreamReply,
};

/// Pause between streamed chunks of a plain-text reply
const PLAIN_CHUNK_PACE: Duration = Duration::from_millis(50);

/// Pause between streamed chunks of a marker-split reply
const MARKED_CHUNK_PACE: Duration = Duration::from_millis(100);

/// Configuration for the relay server
pub struct ServerConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Whether to attach the processing trace to envelopes
    pub debug_traces: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            debug_traces: false,
        }
    }
}

/// The relay server
pub struct RelayServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Resolved chat configuration
    config: Arc<ChatConfig>,
    /// Server configuration
    server_config: ServerConfig,
    /// Number of connections currently being handled
    active_connections: Arc<AtomicUsize>,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(socket_path: PathBuf, config: ChatConfig, server_config: ServerConfig) -> Self {
        Self {
            socket_path,
            config: Arc::new(config),
            server_config,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get peer credentials from a Unix socket
    #[cfg(unix)]
    fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
        use std::os::unix::io::AsRawFd;

        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        let result = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };

        if result == 0 {
            Some(cred.uid)
        } else {
            None
        }
    }

    /// Prepare the socket path (create directory, remove stale socket)
    fn prepare_socket(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
                info!(path = ?parent, "Created socket directory");
            }
        }

        if self.socket_path.exists() {
            warn!(path = ?self.socket_path, "Removing stale socket file");
            fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove stale socket: {:?}", self.socket_path)
            })?;
        }

        Ok(())
    }

    /// Run the relay server until shutdown is requested
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        self.prepare_socket()?;

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {:?}", self.socket_path))?;

        info!(path = ?self.socket_path, "Listening for connections");

        // Socket permissions: owner-only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, perms)?;
        }

        let upstream = Arc::new(UpstreamClient::new(&self.config));
        info!(
            model = %self.config.model,
            api_base = %self.config.api_base,
            streaming = self.config.stream_responses,
            "Relay ready"
        );

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping accept loop");
                break;
            }

            // Accept with timeout to allow checking the shutdown flag
            let accept_result =
                tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;

            let stream = match accept_result {
                Ok(Ok((stream, _addr))) => stream,
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    continue;
                }
                Err(_) => {
                    // Timeout, loop back to check shutdown
                    continue;
                }
            };

            if self.active_connections.load(Ordering::SeqCst) >= self.server_config.max_connections
            {
                warn!("Connection limit reached, rejecting new connection");
                drop(stream);
                continue;
            }

            // Validate peer (same UID as daemon, or root)
            let peer_uid = Self::get_peer_uid(&stream);
            let our_uid = unsafe { libc::getuid() };
            if let Some(uid) = peer_uid {
                if uid != our_uid && uid != 0 {
                    warn!(
                        peer_uid = uid,
                        our_uid = our_uid,
                        "Rejecting connection from different user"
                    );
                    drop(stream);
                    continue;
                }
            }

            let active = Arc::clone(&self.active_connections);
            active.fetch_add(1, Ordering::SeqCst);
            info!(
                peer_uid = ?peer_uid,
                active_connections = active.load(Ordering::SeqCst),
                "New connection accepted"
            );

            let config = Arc::clone(&self.config);
            let upstream = Arc::clone(&upstream);
            let debug_traces = self.server_config.debug_traces;
            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(stream, &config, &upstream, debug_traces).await
                {
                    warn!(error = %e, "Connection handler failed");
                }
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }

        self.shutdown()
    }

    /// Graceful shutdown: remove the socket file
    fn shutdown(&mut self) -> Result<()> {
        info!("Initiating graceful shutdown");

        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove socket: {:?}", self.socket_path))?;
            info!(path = ?self.socket_path, "Socket file removed");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Handle a single client connection: one request, one reply
async fn handle_connection(
    stream: UnixStream,
    config: &ChatConfig,
    upstream: &UpstreamClient,
    debug_traces: bool,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        debug!("Client disconnected before sending a request");
        return Ok(());
    }

    let request: RelayRequest = match serde_json::from_str(line.trim()) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Malformed request line");
            let envelope = RelayResponse::error("Invalid request format", None);
            write_envelope(&mut write_half, &envelope).await?;
            return Ok(());
        }
    };

    let prepared = match prepare_chain(&request, config) {
        Ok(prepared) => prepared,
        Err(e) => {
            debug!(error = %e, "Request rejected");
            let envelope = RelayResponse::error(e.to_string(), None);
            write_envelope(&mut write_half, &envelope).await?;
            return Ok(());
        }
    };
    let debug = debug_traces.then(|| prepared.debug.clone());

    let reply = match upstream.chat(&prepared.chain).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(error = %e, "Upstream request failed");
            let envelope = RelayResponse::error(client_facing_message(&e), debug);
            write_envelope(&mut write_half, &envelope).await?;
            return Ok(());
        }
    };

    if !config.stream_responses {
        let envelope = RelayResponse::success(reply.text(), debug);
        write_envelope(&mut write_half, &envelope).await?;
        return Ok(());
    }

    // Re-chunk the complete reply as an NDJSON content stream. Pacing
    // differs by reply shape: plain text flows in small even chunks,
    // marker-split replies go line by line.
    let (chunks, pace) = match &reply {
        UpstreamReply::WorkersAi(text) => (chunk_plain_text(text), PLAIN_CHUNK_PACE),
        UpstreamReply::OpenAi(text) => (chunk_marked_text(text), MARKED_CHUNK_PACE),
    };
    debug!(chunks = chunks.len(), "Streaming reply");

    for chunk in chunks {
        let line = serde_json::to_string(&serde_json::json!({ "content": chunk }))?;
        write_half.write_all(line.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;
        tokio::time::sleep(pace).await;
    }

    Ok(())
}

/// Serialize and send an envelope as a single line
async fn write_envelope(
    writer: &mut (impl AsyncWriteExt + Unpin),
    envelope: &RelayResponse,
) -> Result<()> {
    let line = serde_json::to_string(envelope)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

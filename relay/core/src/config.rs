//! TOML Configuration File Support
//!
//! Centralized configuration for the client and the relay daemon, loaded
//! from `~/.config/murmur/murmur.toml` with environment-variable
//! overrides on top and built-in defaults underneath.
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (applied by the binaries after loading)
//! 2. Environment variables (`MURMUR_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [chat]
//! max_length = 8000
//! max_history_pairs = 4
//! max_context_tokens = 4096
//! timeout_ms = 30000
//! temperature = 0.7
//! max_tokens = 1000
//!
//! [upstream]
//! api_base = "https://api.siliconflow.cn/v1"
//! model = "deepseek-ai/DeepSeek-V3"
//! api_key = "sk-..."
//!
//! [relay]
//! socket_path = "/run/user/1000/murmur/relay.sock"
//! stream_responses = true
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Chat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// Maximum message/content length in code points
    pub max_length: Option<usize>,
    /// History window, in user/assistant pairs
    pub max_history_pairs: Option<usize>,
    /// Token budget for a request chain
    pub max_context_tokens: Option<u64>,
    /// Whole-request timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum output tokens per completion
    pub max_tokens: Option<u32>,
}

/// Upstream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamToml {
    /// Base URL of the chat-completion API
    pub api_base: Option<String>,
    /// Model identifier
    pub model: Option<String>,
    /// Bearer credential
    pub api_key: Option<String>,
}

/// Relay section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Unix socket path for the relay daemon
    pub socket_path: Option<String>,
    /// Stream NDJSON chunks on success (false = single envelope)
    pub stream_responses: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MurmurToml {
    /// Chat limits section
    pub chat: ChatToml,
    /// Upstream endpoint section
    pub upstream: UpstreamToml,
    /// Relay daemon section
    pub relay: RelayToml,
}

/// Resolved configuration used by the client and the relay
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Maximum message/content length in code points
    pub max_length: usize,
    /// History window, in user/assistant pairs
    pub max_history_pairs: usize,
    /// Token budget for a request chain
    pub max_context_tokens: u64,
    /// Whole-request timeout
    pub timeout: Duration,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum output tokens per completion
    pub max_tokens: u32,
    /// Base URL of the chat-completion API
    pub api_base: String,
    /// Model identifier
    pub model: String,
    /// Bearer credential (empty = unset)
    pub api_key: String,
    /// Unix socket path for the relay daemon (None = runtime default)
    pub socket_path: Option<PathBuf>,
    /// Stream NDJSON chunks on success
    pub stream_responses: bool,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_length: 8000,
            max_history_pairs: 4,
            max_context_tokens: 4096,
            timeout: Duration::from_millis(30_000),
            temperature: 0.7,
            max_tokens: 1000,
            api_base: "https://api.siliconflow.cn/v1".to_string(),
            model: "deepseek-ai/DeepSeek-V3".to_string(),
            api_key: String::new(),
            socket_path: None,
            stream_responses: true,
            config_file_path: None,
        }
    }
}

impl ChatConfig {
    /// Resolve the relay socket path
    ///
    /// Uses the configured path, falling back to
    /// `$XDG_RUNTIME_DIR/murmur/relay.sock`, then `/tmp/murmur/relay.sock`.
    #[must_use]
    pub fn relay_socket_path(&self) -> PathBuf {
        if let Some(ref path) = self.socket_path {
            return path.clone();
        }
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            return PathBuf::from(runtime_dir).join("murmur").join("relay.sock");
        }
        PathBuf::from("/tmp/murmur/relay.sock")
    }
}

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/murmur/murmur.toml` or
/// `~/.config/murmur/murmur.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("murmur").join("murmur.toml"))
}

/// Load configuration from the default path, environment, and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ChatConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ChatConfig, ConfigError> {
    let mut config = ChatConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: MurmurToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ChatConfig, toml: &MurmurToml) {
    if let Some(len) = toml.chat.max_length {
        config.max_length = len;
    }
    if let Some(pairs) = toml.chat.max_history_pairs {
        config.max_history_pairs = pairs;
    }
    if let Some(tokens) = toml.chat.max_context_tokens {
        config.max_context_tokens = tokens;
    }
    if let Some(ms) = toml.chat.timeout_ms {
        config.timeout = Duration::from_millis(ms);
    }
    if let Some(temp) = toml.chat.temperature {
        config.temperature = temp;
    }
    if let Some(max) = toml.chat.max_tokens {
        config.max_tokens = max;
    }

    if let Some(ref base) = toml.upstream.api_base {
        config.api_base = base.clone();
    }
    if let Some(ref model) = toml.upstream.model {
        config.model = model.clone();
    }
    if let Some(ref key) = toml.upstream.api_key {
        config.api_key = key.clone();
    }

    if let Some(ref path) = toml.relay.socket_path {
        config.socket_path = Some(PathBuf::from(path));
    }
    if let Some(stream) = toml.relay.stream_responses {
        config.stream_responses = stream;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ChatConfig) {
    if let Ok(base) = std::env::var("MURMUR_API_BASE") {
        config.api_base = base;
    }
    if let Ok(model) = std::env::var("MURMUR_MODEL") {
        config.model = model;
    }
    if let Ok(key) = std::env::var("MURMUR_API_KEY") {
        config.api_key = key;
    }
    if let Ok(timeout) = std::env::var("MURMUR_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.timeout = Duration::from_millis(ms);
        }
    }
    if let Ok(socket) = std::env::var("MURMUR_SOCKET") {
        config.socket_path = Some(PathBuf::from(socket));
    }
    if let Ok(budget) = std::env::var("MURMUR_MAX_CONTEXT_TOKENS") {
        if let Ok(tokens) = budget.parse::<u64>() {
            config.max_context_tokens = tokens;
        }
    }
}

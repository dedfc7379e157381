//! Murmur Core - Headless Chat Engine for murmur
//!
//! This crate provides the chat logic for murmur, completely independent
//! of any transport or surface. It drives both the relay daemon and the
//! terminal client, and can run headless for testing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Surfaces                           │
//! │   ┌──────────────┐              ┌─────────────────────┐  │
//! │   │  murmur CLI  │              │   relay daemon      │  │
//! │   │  (terminal)  │              │   (unix socket)     │  │
//! │   └──────┬───────┘              └──────────┬──────────┘  │
//! └──────────┼─────────────────────────────────┼─────────────┘
//!            │                                 │
//! ┌──────────┼─────────────────────────────────┼─────────────┐
//! │          │          MURMUR CORE            │             │
//! │  ┌───────┴─────────────────────────────────┴──────────┐  │
//! │  │  ┌────────┐ ┌─────────┐ ┌────────┐ ┌────────────┐  │  │
//! │  │  │ Chain  │ │ Context │ │ Stream │ │  Backend   │  │  │
//! │  │  │Builder │ │ Trimmer │ │Decoders│ │ (upstream) │  │  │
//! │  │  └────────┘ └─────────┘ └────────┘ └────────────┘  │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Message`] / [`build_chain`]: the authoritative request chain
//! - [`trim_to_budget`]: pair-aligned context trimming
//! - [`SseDecoder`] / [`NdjsonDecoder`]: chunk-invariant stream decoding
//! - [`ChatBackend`] / [`UpstreamClient`]: the provider seam
//! - [`SessionContext`]: history, busy flag, and in-flight accumulation
//! - [`ChatConfig`]: TOML + environment configuration
//!
//! # Module Overview
//!
//! - [`backend`]: LLM backend abstraction and the HTTP upstream client
//! - [`chain`]: message types and chain building
//! - [`config`]: TOML configuration with environment overrides
//! - [`context`]: token estimation and budget trimming
//! - [`error`]: the crate-wide error type
//! - [`prompts`]: built-in system prompt presets
//! - [`relay`]: relay envelopes, validation, and reply re-chunking
//! - [`session`]: per-session chat state
//! - [`stream`]: incremental stream decoders
//!
//! # No Surface Dependencies
//!
//! This crate has **zero** dependencies on crossterm or any terminal
//! framework. It's pure chat logic that can be used anywhere.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod prompts;
pub mod relay;
pub mod session;
pub mod stream;

// Re-exports for convenience
pub use backend::{ChatBackend, StreamEvent, UpstreamClient, UpstreamReply};
pub use chain::{build_chain, truncate_chars, Message, RawMessage, Role};
pub use config::{
    default_config_path, load_config, load_config_from_path, ChatConfig, ConfigError,
};
pub use context::{chain_estimate, token_estimate, trim_to_budget};
pub use error::ChatError;
pub use prompts::{find_preset, PromptPreset, PromptSelection, PRESETS, RELAY_SYSTEM_PROMPT};
pub use relay::{
    chunk_marked_text, chunk_plain_text, client_facing_message, prepare_chain, PreparedChain,
    RelayData, RelayRequest, RelayResponse, TIMEOUT_NOTICE,
};
pub use session::{SessionContext, SessionId};
pub use stream::{DeltaAccumulator, NdjsonDecoder, SseDecoder, StreamDelta};

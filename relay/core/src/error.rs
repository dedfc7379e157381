//! Error Types
//!
//! One error enum covers the request lifecycle: input validation (the
//! request is never sent), transport failures including the distinguished
//! timeout, upstream HTTP errors, and response-shape mismatches. Stream
//! decode failures are not errors at all; malformed lines are absorbed by
//! the decoders.

use thiserror::Error;

/// Errors surfaced by chat requests, validation, and the relay
#[derive(Debug, Error)]
pub enum ChatError {
    /// Message was empty after trimming whitespace
    #[error("message must not be empty")]
    EmptyMessage,

    /// Message exceeded the configured character limit
    #[error("message exceeds {limit} characters")]
    MessageTooLong {
        /// The configured limit
        limit: usize,
    },

    /// Request body was missing or structurally invalid
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request (or its stream) exceeded the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Network-level failure talking to the upstream endpoint
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream answered with a non-success HTTP status
    #[error("upstream returned HTTP {status}: {body}")]
    UpstreamStatus {
        /// HTTP status code
        status: u16,
        /// Body snippet for diagnostics
        body: String,
    },

    /// Upstream payload matched none of the known response shapes
    #[error("unrecognized upstream response shape: {0}")]
    UnexpectedShape(String),

    /// Failure reaching the relay daemon, or an error it reported
    #[error("relay failure: {0}")]
    Relay(String),

    /// A request is already in flight for this session
    #[error("another request is already in flight")]
    RequestInFlight,
}

impl ChatError {
    /// True for errors detected before anything was sent upstream
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage | Self::MessageTooLong { .. } | Self::InvalidRequest(_)
        )
    }

    /// True for the distinguished timeout failure
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

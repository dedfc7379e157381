//! Message Chain Construction
//!
//! Builds the ordered message list sent to the completion endpoint for
//! one turn: a system prompt, a bounded window of prior history, and the
//! new user message. History entries with unknown roles or empty content
//! are dropped silently; all content is truncated to a configured number
//! of Unicode code points before it enters the chain.

use serde::{Deserialize, Serialize};

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction (always first in a chain)
    System,
    /// User input
    User,
    /// Model reply
    Assistant,
}

impl Role {
    /// Parse a wire-form role string
    ///
    /// Returns `None` for anything that is not exactly `system`, `user`,
    /// or `assistant`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    /// Wire-form string for this role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a chain or in session history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,
    /// Message content
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A history entry as received on the wire, before validation
///
/// Role is kept as a raw string here; the chain builder decides what
/// survives into a [`Message`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawMessage {
    /// Role string (`user`, `assistant`, or anything else)
    #[serde(default)]
    pub role: String,
    /// Message content
    #[serde(default)]
    pub content: String,
}

impl From<&Message> for RawMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }
    }
}

/// Truncate a string to at most `max` Unicode code points
///
/// Never cuts inside a code point. Truncating an already-short string is
/// a no-op, and the operation is idempotent.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Build the message chain for one request
///
/// Shape: `[system] + windowed-history + [new user message]`.
///
/// - Only the most recent `2 * max_history_pairs` history entries are
///   considered, in order.
/// - Entries whose role is not exactly `user` or `assistant`, or whose
///   content is empty, are dropped silently.
/// - Every content string is truncated to `max_length` code points,
///   including the new user message.
///
/// Pure function of its inputs; no I/O.
#[must_use]
pub fn build_chain(
    system_prompt: &str,
    history: &[RawMessage],
    new_message: &str,
    max_history_pairs: usize,
    max_length: usize,
) -> Vec<Message> {
    let mut chain = Vec::with_capacity(history.len() + 2);
    chain.push(Message::system(system_prompt));

    let window_start = history.len().saturating_sub(max_history_pairs * 2);
    for record in &history[window_start..] {
        let Some(role) = Role::parse(&record.role) else {
            continue;
        };
        if !matches!(role, Role::User | Role::Assistant) || record.content.is_empty() {
            continue;
        }
        chain.push(Message {
            role,
            content: truncate_chars(&record.content, max_length).to_string(),
        });
    }

    chain.push(Message::user(truncate_chars(new_message, max_length)));
    chain
}

//! Session Context
//!
//! Explicit, owned state for one chat session: the persisted history,
//! the single-request busy flag, and the in-flight delta accumulation.
//! The busy flag is the entire concurrency discipline — at most one
//! request is in flight, and every exit path goes through
//! [`SessionContext::finish_request`] or [`SessionContext::cancel_request`]
//! so input affordances are always restored.

use uuid::Uuid;

use crate::chain::{Message, RawMessage};
use crate::error::ChatError;
use crate::stream::{DeltaAccumulator, StreamDelta};

/// Unique identifier for a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// One chat session: history, busy flag, in-flight accumulation
#[derive(Debug)]
pub struct SessionContext {
    /// Unique session identifier
    pub id: SessionId,
    history: Vec<Message>,
    busy: bool,
    accumulator: DeltaAccumulator,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    /// Create an empty session
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            history: Vec::new(),
            busy: false,
            accumulator: DeltaAccumulator::new(),
        }
    }

    /// Append a user message to history
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(Message::user(content));
    }

    /// Append an assistant message to history
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.history.push(Message::assistant(content));
    }

    /// Full session history, in order
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// History in wire form, for the chain builder
    #[must_use]
    pub fn raw_history(&self) -> Vec<RawMessage> {
        self.history.iter().map(RawMessage::from).collect()
    }

    /// True while a request is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Begin a request: set the busy flag, reset accumulation
    ///
    /// # Errors
    ///
    /// [`ChatError::RequestInFlight`] if a request is already running.
    pub fn begin_request(&mut self) -> Result<(), ChatError> {
        if self.busy {
            return Err(ChatError::RequestInFlight);
        }
        self.busy = true;
        self.accumulator = DeltaAccumulator::new();
        Ok(())
    }

    /// Fold a stream delta into the in-flight accumulation
    pub fn apply_delta(&mut self, delta: &StreamDelta) {
        self.accumulator.apply(delta);
    }

    /// Reasoning accumulated for the in-flight reply
    #[must_use]
    pub fn reasoning_so_far(&self) -> &str {
        self.accumulator.reasoning()
    }

    /// Content accumulated for the in-flight reply
    #[must_use]
    pub fn content_so_far(&self) -> &str {
        self.accumulator.content()
    }

    /// Finish a request successfully: commit the accumulated content to
    /// history as the assistant reply and clear the busy flag
    ///
    /// Returns the committed reply text (empty if the stream produced no
    /// content; nothing is committed in that case).
    pub fn finish_request(&mut self) -> String {
        self.busy = false;
        let content = self.accumulator.take_content();
        if !content.is_empty() {
            self.history.push(Message::assistant(content.clone()));
        }
        content
    }

    /// Abort a request: discard accumulation and clear the busy flag
    pub fn cancel_request(&mut self) {
        self.busy = false;
        self.accumulator = DeltaAccumulator::new();
    }

    /// Drop all history and any in-flight state
    pub fn clear(&mut self) {
        self.history.clear();
        self.cancel_request();
    }
}

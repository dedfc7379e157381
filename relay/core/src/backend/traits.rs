//! Chat Backend Trait
//!
//! Trait definition shared by every reply source. A backend takes a
//! finished message chain and returns a channel of [`StreamEvent`]s;
//! the surface pulls events in arrival order and never sees transport
//! details.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chain::Message;
use crate::error::ChatError;
use crate::stream::StreamDelta;

/// Events delivered over a streaming reply channel
#[derive(Debug)]
pub enum StreamEvent {
    /// An incremental reasoning/content update
    Delta(StreamDelta),
    /// The reply finished normally
    Done,
    /// The reply failed; no further events follow
    Failed(ChatError),
}

impl StreamEvent {
    /// True for the terminal success event
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// A source of streamed chat replies
///
/// Implementations: the direct provider client and the relay client.
/// The channel is closed after `Done` or `Failed`; exactly one terminal
/// event is delivered per request.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logs and notices
    fn name(&self) -> &'static str;

    /// Send a message chain and stream the reply
    ///
    /// Returns a receiver of deltas in arrival order. Errors that occur
    /// before any bytes arrive are returned directly; errors mid-stream
    /// arrive as a `Failed` event.
    async fn stream_chat(
        &self,
        chain: &[Message],
    ) -> Result<mpsc::Receiver<StreamEvent>, ChatError>;
}

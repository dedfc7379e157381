//! Chat Backends
//!
//! The [`ChatBackend`] trait is the seam between surfaces and whatever
//! actually produces a streamed reply: the hosted provider directly
//! ([`UpstreamClient`]) or the relay daemon (implemented in the CLI
//! crate). Both deliver the same [`StreamEvent`] channel vocabulary.

pub mod traits;
pub mod upstream;

pub use traits::{ChatBackend, StreamEvent};
pub use upstream::{UpstreamClient, UpstreamReply};

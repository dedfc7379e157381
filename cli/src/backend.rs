//! Backend Selection
//!
//! The client talks to the model in one of two ways: directly to the
//! chat-completion provider over HTTPS, or through the local relay
//! daemon over its Unix socket. Both are exposed behind the same
//! [`ChatBackend`] trait, so the chat loop does not care which is in
//! use.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use murmur_core::{
    ChatBackend, ChatConfig, ChatError, Message, NdjsonDecoder, RawMessage, RelayRequest,
    RelayResponse, Role, StreamDelta, StreamEvent, UpstreamClient, TIMEOUT_NOTICE,
};

/// How the client reaches the model
#[derive(Clone, Debug)]
pub enum ChatConnection {
    /// Direct connection to the chat-completion provider
    Direct,
    /// Through the local relay daemon
    Relay {
        /// Unix socket path of the relay
        socket_path: PathBuf,
    },
}

/// Build the backend for the selected connection
pub fn connect(connection: &ChatConnection, config: &ChatConfig) -> Box<dyn ChatBackend> {
    match connection {
        ChatConnection::Direct => Box::new(UpstreamClient::new(config)),
        ChatConnection::Relay { socket_path } => Box::new(RelayClient::new(socket_path.clone())),
    }
}

/// Client for the relay daemon's line-delimited socket protocol
pub struct RelayClient {
    socket_path: PathBuf,
}

impl RelayClient {
    /// Create a client for the relay at the given socket path
    #[must_use]
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Rebuild the relay request from a prepared chain
    ///
    /// The relay owns the system prompt and re-validates history, so the
    /// wire request carries only the raw turns and the new message.
    fn request_from_chain(chain: &[Message]) -> Result<RelayRequest, ChatError> {
        let (message, history) = match chain.split_last() {
            Some((last, rest)) if last.role == Role::User => (last.content.clone(), rest),
            _ => {
                return Err(ChatError::InvalidRequest(
                    "chain must end with a user message".to_string(),
                ))
            }
        };

        let history = history
            .iter()
            .filter(|m| m.role != Role::System)
            .map(RawMessage::from)
            .collect();

        Ok(RelayRequest { message, history })
    }
}

#[async_trait]
impl ChatBackend for RelayClient {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn stream_chat(
        &self,
        chain: &[Message],
    ) -> Result<mpsc::Receiver<StreamEvent>, ChatError> {
        let request = Self::request_from_chain(chain)?;
        let line = serde_json::to_string(&request)
            .map_err(|e| ChatError::InvalidRequest(e.to_string()))?;

        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| ChatError::Relay(format!("relay unreachable: {e}")))?;
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ChatError::Relay(format!("relay write failed: {e}")))?;
        stream
            .write_all(b"\n")
            .await
            .map_err(|e| ChatError::Relay(format!("relay write failed: {e}")))?;

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stream);

            // First line decides the reply mode: an envelope (errors, or
            // success with streaming disabled) or the first NDJSON chunk.
            let mut first = String::new();
            match reader.read_line(&mut first).await {
                Ok(0) => {
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Failed(ChatError::Relay(format!(
                            "relay read failed: {e}"
                        ))))
                        .await;
                    return;
                }
            }

            if let Ok(envelope) = serde_json::from_str::<RelayResponse>(first.trim()) {
                if envelope.is_success() {
                    let text = envelope.data.map(|d| d.response).unwrap_or_default();
                    if !text.is_empty()
                        && tx
                            .send(StreamEvent::Delta(StreamDelta::content(text)))
                            .await
                            .is_err()
                    {
                        return;
                    }
                    let _ = tx.send(StreamEvent::Done).await;
                } else {
                    let _ = tx
                        .send(StreamEvent::Failed(envelope_error(&envelope)))
                        .await;
                }
                return;
            }

            // NDJSON chunk stream; the first line is already a chunk.
            // Remaining reads are raw bytes so a chunk boundary inside a
            // multi-byte character is handled by the decoder.
            let mut decoder = NdjsonDecoder::new();
            let mut fragments = decoder.push(&first);
            let mut buf = [0u8; 4096];
            loop {
                for fragment in fragments.drain(..) {
                    if tx
                        .send(StreamEvent::Delta(StreamDelta::content(fragment)))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => fragments = decoder.push_bytes(&buf[..n]),
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Failed(ChatError::Relay(format!(
                                "relay read failed: {e}"
                            ))))
                            .await;
                        return;
                    }
                }
            }
            if let Some(fragment) = decoder.finish() {
                let _ = tx
                    .send(StreamEvent::Delta(StreamDelta::content(fragment)))
                    .await;
            }
            let _ = tx.send(StreamEvent::Done).await;
        });

        Ok(rx)
    }
}

/// Map an error envelope to the matching error class
///
/// The relay's timeout notice maps back to the distinguished timeout
/// error; everything else is a relay-reported failure.
fn envelope_error(envelope: &RelayResponse) -> ChatError {
    if envelope.message == TIMEOUT_NOTICE {
        ChatError::Timeout
    } else {
        ChatError::Relay(envelope.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::net::UnixListener;

    #[test]
    fn test_request_from_chain_strips_system() {
        let chain = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("how are you"),
        ];
        let request = RelayClient::request_from_chain(&chain).unwrap();
        assert_eq!(request.message, "how are you");
        assert_eq!(request.history.len(), 2);
        assert_eq!(request.history[0].role, "user");
        assert_eq!(request.history[1].role, "assistant");
    }

    #[test]
    fn test_request_from_chain_requires_trailing_user() {
        let chain = vec![Message::user("hi"), Message::assistant("hello")];
        assert!(matches!(
            RelayClient::request_from_chain(&chain),
            Err(ChatError::InvalidRequest(_))
        ));
        assert!(RelayClient::request_from_chain(&[]).is_err());
    }

    #[test]
    fn test_envelope_error_classes() {
        let timeout = RelayResponse::error(TIMEOUT_NOTICE, None);
        assert!(matches!(envelope_error(&timeout), ChatError::Timeout));

        let other = RelayResponse::error("Upstream request failed", None);
        let mapped = envelope_error(&other);
        assert!(matches!(mapped, ChatError::Relay(_)));
        assert!(!mapped.is_validation());
    }

    /// Spawn a relay double that reads one request and replies with the
    /// given write bursts, then closes the connection
    fn fake_relay(replies: Vec<Vec<u8>>) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            reader.read_line(&mut request).await.unwrap();
            assert!(serde_json::from_str::<RelayRequest>(&request).is_ok());

            let mut stream = reader.into_inner();
            for burst in replies {
                stream.write_all(&burst).await.unwrap();
                stream.flush().await.unwrap();
            }
        });
        (dir, path)
    }

    async fn collect_events(path: PathBuf) -> Vec<StreamEvent> {
        let client = RelayClient::new(path);
        let chain = vec![Message::user("hi")];
        let mut rx = client.stream_chat(&chain).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn collected_content(events: &[StreamEvent]) -> String {
        let mut content = String::new();
        for event in events {
            if let StreamEvent::Delta(delta) = event {
                content.push_str(delta.content.as_deref().unwrap_or(""));
            }
        }
        content
    }

    #[tokio::test]
    async fn test_stream_chat_ndjson_split_mid_character() {
        // Burst boundary lands one byte into こ of the second chunk line
        let wire = "{\"content\":\"Hel\"}\n{\"content\":\"lo こんにちは\"}\n".as_bytes();
        let split = wire.len() - 10;
        let (_dir, path) = fake_relay(vec![wire[..split].to_vec(), wire[split..].to_vec()]);

        let events = collect_events(path).await;
        assert_eq!(collected_content(&events), "Hello こんにちは");
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
    }

    #[tokio::test]
    async fn test_stream_chat_timeout_envelope_maps_to_timeout() {
        let envelope = RelayResponse::error(TIMEOUT_NOTICE, None);
        let mut wire = serde_json::to_vec(&envelope).unwrap();
        wire.push(b'\n');
        let (_dir, path) = fake_relay(vec![wire]);

        let events = collect_events(path).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            StreamEvent::Failed(ChatError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_stream_chat_error_envelope_is_relay_class() {
        let envelope = RelayResponse::error("message exceeds 8000 characters", None);
        let mut wire = serde_json::to_vec(&envelope).unwrap();
        wire.push(b'\n');
        let (_dir, path) = fake_relay(vec![wire]);

        let events = collect_events(path).await;
        match &events[0] {
            StreamEvent::Failed(e) => {
                assert!(matches!(e, ChatError::Relay(_)));
                assert!(!e.is_validation());
            }
            other => panic!("expected failure event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_chat_success_envelope_single_delta() {
        let envelope = RelayResponse::success("full reply", None);
        let mut wire = serde_json::to_vec(&envelope).unwrap();
        wire.push(b'\n');
        let (_dir, path) = fake_relay(vec![wire]);

        let events = collect_events(path).await;
        assert_eq!(collected_content(&events), "full reply");
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_relay_error() {
        let client = RelayClient::new(PathBuf::from("/nonexistent/murmur/relay.sock"));
        let chain = vec![Message::user("hi")];
        let err = client.stream_chat(&chain).await.unwrap_err();
        assert!(matches!(err, ChatError::Relay(_)));
        assert!(!err.is_validation());
    }
}

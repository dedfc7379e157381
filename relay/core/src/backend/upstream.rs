//! Upstream Completion Client
//!
//! Direct client for the hosted chat-completion endpoint. One POST per
//! request, bearer auth, either a single JSON completion object or a
//! `data:`-prefixed SSE stream terminated by the `[DONE]` sentinel.
//!
//! Two response shapes are known (the provider migrated at some point):
//! a nested `result.response` object and the OpenAI-style
//! `choices[0].message.content`. They are tried in that order; a payload
//! matching neither is a response-shape failure, not a transport one.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::traits::{ChatBackend, StreamEvent};
use crate::chain::Message;
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::stream::SseDecoder;

/// Wire form of a chat-completion request
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

/// A decoded non-streaming completion, tagged by the shape that matched
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamReply {
    /// `result.response` shape (workers-ai style)
    WorkersAi(String),
    /// `choices[0].message.content` shape (openai style)
    OpenAi(String),
}

impl UpstreamReply {
    /// Try the known shape matchers in order; first match wins
    ///
    /// # Errors
    ///
    /// [`ChatError::UnexpectedShape`] when neither shape matches,
    /// citing a snippet of the offending payload.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ChatError> {
        if let Some(text) = value
            .get("result")
            .and_then(|r| r.get("response"))
            .and_then(serde_json::Value::as_str)
        {
            return Ok(Self::WorkersAi(text.to_string()));
        }
        if let Some(text) = value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(serde_json::Value::as_str)
        {
            return Ok(Self::OpenAi(text.to_string()));
        }
        Err(ChatError::UnexpectedShape(snippet(&value.to_string())))
    }

    /// The reply text, whichever shape carried it
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::WorkersAi(text) | Self::OpenAi(text) => text,
        }
    }
}

/// Truncate a diagnostic string to a reasonable length
fn snippet(s: &str) -> String {
    const MAX: usize = 200;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let cut: String = s.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

/// Direct client for the hosted completion endpoint
#[derive(Clone)]
pub struct UpstreamClient {
    http_client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl UpstreamClient {
    /// Create a client from resolved configuration
    #[must_use]
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(15))
                .build()
                .expect("Failed to create HTTP client"),
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout,
        }
    }

    /// Completion endpoint URL
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    /// Issue the POST, map connect-phase timeouts to the timeout error
    async fn post_request(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<reqwest::Response, ChatError> {
        let response = tokio::time::timeout(
            self.timeout,
            self.http_client
                .post(self.completions_url())
                .bearer_auth(&self.api_key)
                .json(request)
                .send(),
        )
        .await
        .map_err(|_| ChatError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::UpstreamStatus {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }
        Ok(response)
    }

    /// Send a chain and wait for the complete reply (non-streaming)
    ///
    /// # Errors
    ///
    /// Transport, timeout, upstream-status, or response-shape errors.
    pub async fn chat(&self, chain: &[Message]) -> Result<UpstreamReply, ChatError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: chain,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: None,
        };

        let response = self.post_request(&request).await?;
        let value: serde_json::Value = tokio::time::timeout(self.timeout, response.json())
            .await
            .map_err(|_| ChatError::Timeout)??;

        UpstreamReply::from_value(&value)
    }
}

#[async_trait]
impl ChatBackend for UpstreamClient {
    fn name(&self) -> &'static str {
        "upstream"
    }

    async fn stream_chat(
        &self,
        chain: &[Message],
    ) -> Result<mpsc::Receiver<StreamEvent>, ChatError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: chain,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: Some(true),
        };

        // The deadline covers the whole transfer, not just the POST.
        let deadline = Instant::now() + self.timeout;
        let response = self.post_request(&request).await?;
        let mut body = response.bytes_stream();

        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();

            loop {
                let chunk = match tokio::time::timeout_at(deadline, body.next()).await {
                    Ok(Some(Ok(bytes))) => bytes,
                    Ok(Some(Err(e))) => {
                        let _ = tx.send(StreamEvent::Failed(ChatError::Transport(e))).await;
                        return;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!("Streaming reply exceeded timeout, aborting transfer");
                        let _ = tx.send(StreamEvent::Failed(ChatError::Timeout)).await;
                        return;
                    }
                };

                // Byte-level push: a chunk may end mid-character
                for delta in decoder.push_bytes(&chunk) {
                    if tx.send(StreamEvent::Delta(delta)).await.is_err() {
                        // Receiver dropped, stop streaming
                        return;
                    }
                }
            }

            if let Some(delta) = decoder.finish() {
                let _ = tx.send(StreamEvent::Delta(delta)).await;
            }
            let _ = tx.send(StreamEvent::Done).await;
        });

        Ok(rx)
    }
}

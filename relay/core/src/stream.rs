//! Incremental Stream Decoding
//!
//! Decoders for the two newline-delimited reply streams murmur deals
//! with:
//!
//! - [`SseDecoder`] — the provider's server-sent-event stream
//!   (`data: <json>` lines terminated by a `data: [DONE]` sentinel),
//!   yielding [`StreamDelta`] values with independent reasoning and
//!   content fragments.
//! - [`NdjsonDecoder`] — the relay's `{"content": string}` line stream.
//!
//! Both maintain a growing text buffer, drain complete lines as chunks
//! arrive, and parse each line best-effort: a malformed line is skipped
//! and never aborts the stream. Transports feed raw bytes through
//! `push_bytes`, which holds back an unfinished multi-byte UTF-8
//! sequence until its remaining bytes arrive, so decoding is invariant
//! to how the transport chunks the bytes — including a chunk boundary
//! inside a character.

use serde::{Deserialize, Serialize};

/// Prefix of an SSE event-data line
pub const DATA_PREFIX: &str = "data: ";

/// Termination sentinel payload of an SSE stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// One incremental update from a streamed reply
///
/// Both fragments are optional and independent; a delta is only emitted
/// when at least one side is present. Empty-string fragments are
/// suppressed at decode time, so a present fragment is always non-empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Reasoning ("thinking") fragment, if any
    pub reasoning: Option<String>,
    /// Final-answer fragment, if any
    pub content: Option<String>,
}

impl StreamDelta {
    /// A delta carrying only a content fragment
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            reasoning: None,
            content: Some(text.into()),
        }
    }

    /// A delta carrying only a reasoning fragment
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            content: None,
        }
    }

    /// True when neither fragment is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reasoning.is_none() && self.content.is_none()
    }
}

/// Drain the longest decodable prefix of buffered transport bytes
///
/// An unfinished multi-byte sequence at the tail is held back until its
/// remaining bytes arrive; bytes that can never form a valid sequence
/// are replaced rather than stalling the stream.
fn take_complete_utf8(pending: &mut Vec<u8>) -> String {
    let boundary = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => pending.len(),
    };
    let head: Vec<u8> = pending.drain(..boundary).collect();
    String::from_utf8_lossy(&head).into_owned()
}

/// Incremental decoder for the provider's SSE event stream
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of decoded text, returning all deltas completed by it
    ///
    /// The chunk may split lines or JSON payloads anywhere; only
    /// complete `\n`-terminated lines are parsed.
    pub fn push(&mut self, chunk: &str) -> Vec<StreamDelta> {
        self.buffer.push_str(chunk);

        let mut deltas = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(delta) = Self::decode_line(line.trim()) {
                deltas.push(delta);
            }
        }
        deltas
    }

    /// Feed raw transport bytes, returning all deltas completed by them
    ///
    /// The chunk may additionally end inside a multi-byte character; the
    /// partial sequence is buffered until the rest of it arrives.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<StreamDelta> {
        self.pending.extend_from_slice(chunk);
        let text = take_complete_utf8(&mut self.pending);
        self.push(&text)
    }

    /// Final best-effort parse of any buffered remainder
    ///
    /// Call once when the transport reports end of stream; handles a
    /// source that omits the trailing newline. A byte tail that never
    /// completed decodes lossily.
    pub fn finish(&mut self) -> Option<StreamDelta> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(rest.trim())
    }

    /// Decode a single trimmed line
    ///
    /// Blank lines, the sentinel, lines without the event-data prefix,
    /// and unparseable payloads all yield `None`.
    fn decode_line(line: &str) -> Option<StreamDelta> {
        if line.is_empty() || line.contains(DONE_SENTINEL) {
            return None;
        }
        let payload = line.strip_prefix(DATA_PREFIX)?;
        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed stream line");
                return None;
            }
        };

        let delta = value.get("choices")?.get(0)?.get("delta")?;
        let fragment = |key: &str| {
            delta
                .get(key)
                .and_then(serde_json::Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let out = StreamDelta {
            reasoning: fragment("reasoning_content"),
            content: fragment("content"),
        };
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

/// Incremental decoder for the relay's NDJSON content stream
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    pending: Vec<u8>,
    buffer: String,
}

impl NdjsonDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning all content fragments completed by it
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut fragments = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(fragment) = Self::decode_line(line.trim()) {
                fragments.push(fragment);
            }
        }
        fragments
    }

    /// Feed raw transport bytes, buffering a partial multi-byte tail
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let text = take_complete_utf8(&mut self.pending);
        self.push(&text)
    }

    /// Final best-effort parse of any buffered remainder
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(rest.trim())
    }

    fn decode_line(line: &str) -> Option<String> {
        if line.is_empty() {
            return None;
        }
        #[derive(Deserialize)]
        struct Chunk {
            content: String,
        }
        let chunk: Chunk = serde_json::from_str(line).ok()?;
        if chunk.content.is_empty() {
            None
        } else {
            Some(chunk.content)
        }
    }
}

/// Accumulates stream deltas into two running strings
///
/// The presentation side re-renders the whole accumulated string on
/// every fragment; this type just owns the accumulation.
#[derive(Clone, Debug, Default)]
pub struct DeltaAccumulator {
    reasoning: String,
    content: String,
}

impl DeltaAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the fragments of a delta
    pub fn apply(&mut self, delta: &StreamDelta) {
        if let Some(ref r) = delta.reasoning {
            self.reasoning.push_str(r);
        }
        if let Some(ref c) = delta.content {
            self.content.push_str(c);
        }
    }

    /// Reasoning accumulated so far
    #[must_use]
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Final-answer content accumulated so far
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// True when nothing has been accumulated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reasoning.is_empty() && self.content.is_empty()
    }

    /// Drop everything accumulated, returning the content
    pub fn take_content(&mut self) -> String {
        self.reasoning.clear();
        std::mem::take(&mut self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(reasoning: Option<&str>, content: Option<&str>) -> String {
        let delta = serde_json::json!({
            "choices": [{ "delta": {
                "reasoning_content": reasoning,
                "content": content,
            }}]
        });
        format!("data: {delta}\n")
    }

    #[test]
    fn test_decode_content_fragment() {
        let mut dec = SseDecoder::new();
        let deltas = dec.push(&event(None, Some("hello")));
        assert_eq!(deltas, vec![StreamDelta::content("hello")]);
    }

    #[test]
    fn test_decode_reasoning_fragment() {
        let mut dec = SseDecoder::new();
        let deltas = dec.push(&event(Some("hmm"), None));
        assert_eq!(deltas, vec![StreamDelta::reasoning("hmm")]);
    }

    #[test]
    fn test_decode_both_fragments() {
        let mut dec = SseDecoder::new();
        let deltas = dec.push(&event(Some("think"), Some("say")));
        assert_eq!(
            deltas,
            vec![StreamDelta {
                reasoning: Some("think".to_string()),
                content: Some("say".to_string()),
            }]
        );
    }

    #[test]
    fn test_empty_fragments_suppressed() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(&event(Some(""), Some(""))).is_empty());
        assert!(dec.push(&event(None, None)).is_empty());
    }

    #[test]
    fn test_sentinel_produces_nothing() {
        let mut dec = SseDecoder::new();
        assert!(dec.push("data: [DONE]\n").is_empty());
        assert!(dec.finish().is_none());
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut dec = SseDecoder::new();
        assert!(dec.push("\n\n   \n").is_empty());
    }

    #[test]
    fn test_malformed_line_skipped() {
        let mut dec = SseDecoder::new();
        let mut stream = String::new();
        stream.push_str(&event(None, Some("a")));
        stream.push_str("data: {not json at all\n");
        stream.push_str(&event(None, Some("b")));

        let deltas = dec.push(&stream);
        assert_eq!(
            deltas,
            vec![StreamDelta::content("a"), StreamDelta::content("b")]
        );
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let mut stream = String::new();
        stream.push_str(&event(Some("rea"), None));
        stream.push_str(&event(Some("soning"), Some("and")));
        stream.push_str(&event(None, Some(" multi-byte: 日本語")));
        stream.push_str("data: [DONE]\n");

        // Whole-block reference
        let mut whole = SseDecoder::new();
        let mut expected = whole.push(&stream);
        if let Some(d) = whole.finish() {
            expected.push(d);
        }

        // Re-feed split at every possible char boundary, in two pieces
        let chars: Vec<usize> = stream
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(stream.len()))
            .collect();
        for &split in &chars {
            let mut dec = SseDecoder::new();
            let mut got = dec.push(&stream[..split]);
            got.extend(dec.push(&stream[split..]));
            if let Some(d) = dec.finish() {
                got.push(d);
            }
            assert_eq!(got, expected, "split at byte {split}");
        }
    }

    #[test]
    fn test_byte_split_inside_multibyte_character() {
        // A chunk boundary one byte into 日 must not corrupt the
        // fragment into replacement characters.
        let stream = event(None, Some("日本語です"));
        let bytes = stream.as_bytes();
        let split = stream.find('日').unwrap() + 1;

        let mut dec = SseDecoder::new();
        let mut got = dec.push_bytes(&bytes[..split]);
        got.extend(dec.push_bytes(&bytes[split..]));

        assert_eq!(got, vec![StreamDelta::content("日本語です")]);
    }

    #[test]
    fn test_byte_chunk_boundary_invariance() {
        let mut stream = String::new();
        stream.push_str(&event(Some("考え"), None));
        stream.push_str(&event(None, Some("答えは 42")));
        stream.push_str("data: [DONE]\n");
        let bytes = stream.as_bytes();

        let mut whole = SseDecoder::new();
        let mut expected = whole.push_bytes(bytes);
        if let Some(d) = whole.finish() {
            expected.push(d);
        }

        // Every byte split point, including ones inside characters
        for split in 0..=bytes.len() {
            let mut dec = SseDecoder::new();
            let mut got = dec.push_bytes(&bytes[..split]);
            got.extend(dec.push_bytes(&bytes[split..]));
            if let Some(d) = dec.finish() {
                got.push(d);
            }
            assert_eq!(got, expected, "split at byte {split}");
        }
    }

    #[test]
    fn test_ndjson_byte_split_inside_multibyte_character() {
        let wire = "{\"content\":\"こんにちは\"}\n";
        let bytes = wire.as_bytes();
        let split = wire.find('こ').unwrap() + 2;

        let mut dec = NdjsonDecoder::new();
        let mut got = dec.push_bytes(&bytes[..split]);
        got.extend(dec.push_bytes(&bytes[split..]));
        assert_eq!(got, vec!["こんにちは".to_string()]);
    }

    #[test]
    fn test_finish_decodes_pending_byte_tail() {
        let line = event(None, Some("tail 語"));
        let bytes = line.trim_end().as_bytes();

        let mut dec = SseDecoder::new();
        // Withhold the last byte of 語 so it stays pending at EOF
        assert!(dec.push_bytes(&bytes[..bytes.len() - 1]).is_empty());
        assert!(dec.push_bytes(&bytes[bytes.len() - 1..]).is_empty());
        assert_eq!(dec.finish(), Some(StreamDelta::content("tail 語")));
    }

    #[test]
    fn test_finish_parses_unterminated_line() {
        let mut dec = SseDecoder::new();
        let line = event(None, Some("tail"));
        // Feed without the trailing newline
        assert!(dec.push(line.trim_end()).is_empty());
        assert_eq!(dec.finish(), Some(StreamDelta::content("tail")));
        // Decoder is drained afterwards
        assert!(dec.finish().is_none());
    }

    #[test]
    fn test_ndjson_decode() {
        let mut dec = NdjsonDecoder::new();
        let got = dec.push("{\"content\":\"one\"}\n{\"content\":\"two\"}\nbroken\n");
        assert_eq!(got, vec!["one".to_string(), "two".to_string()]);
        assert!(dec.push("{\"content\":\"th").is_empty());
        assert_eq!(dec.push("ree\"}\n"), vec!["three".to_string()]);
    }

    #[test]
    fn test_accumulator_appends() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(&StreamDelta::reasoning("step 1. "));
        acc.apply(&StreamDelta::reasoning("step 2."));
        acc.apply(&StreamDelta::content("Answer: "));
        acc.apply(&StreamDelta::content("42"));

        assert_eq!(acc.reasoning(), "step 1. step 2.");
        assert_eq!(acc.content(), "Answer: 42");

        let content = acc.take_content();
        assert_eq!(content, "Answer: 42");
        assert!(acc.is_empty());
    }
}

//! Framing-agnostic line decoder for streamed provider responses.
//!
//! Handles both conventions seen in the wild:
//!
//! ```text
//! {"candidates":[...]}                      <- bare NDJSON
//! event: ping                               <- SSE metadata, skipped
//! data: {"choices":[{"delta":{...}}]}       <- SSE data line
//!                                           <- SSE frame separator, skipped
//! data: [DONE]                              <- terminal sentinel, skipped
//! ```
//!
//! Bytes are decoded incrementally; a multi-byte character or a line split
//! across chunk boundaries is reassembled before parsing.

use crate::providers::error::ProviderError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::char::REPLACEMENT_CHARACTER;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// The sentinel value that marks the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Lazy, forward-only stream of decoded JSON frames
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Value, ProviderError>> + Send>>;

/// Outcome of classifying a single line
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// A JSON protocol unit
    Payload(Value),
    /// Blank line, keepalive, metadata or sentinel
    Skip,
}

/// Classify one line of a streamed body.
///
/// # Errors
///
/// Returns the JSON error when the line carries content that is neither a
/// skip marker nor valid JSON.
pub fn parse_line(line: &str) -> Result<StreamFrame, serde_json::Error> {
    let line = line.trim();

    if line.is_empty() || line.starts_with(':') {
        return Ok(StreamFrame::Skip);
    }

    if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
        return Ok(StreamFrame::Skip);
    }

    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None => line,
    };

    if payload.is_empty() || payload == DONE_SENTINEL {
        return Ok(StreamFrame::Skip);
    }

    serde_json::from_str(payload).map(StreamFrame::Payload)
}

/// Push-based decoder state owned by a single stream.
///
/// Feed bytes with [`push`](Self::push), pull frames with
/// [`next_frame`](Self::next_frame), and call [`finish`](Self::finish) once
/// the source is exhausted so a final unterminated line is still processed.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Decoded text not yet resolved into a complete line
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending: Vec<u8>,
    /// Status of the response being decoded, reported on protocol errors
    status: u16,
    finished: bool,
}

impl FrameDecoder {
    /// Create a decoder for a response with the given status
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Append a chunk of raw bytes
    pub fn push(&mut self, chunk: &[u8]) {
        if self.finished {
            return;
        }
        self.pending.extend_from_slice(chunk);
        self.decode_pending(false);
    }

    /// Mark the end of input. Any partial character is replaced and an
    /// unterminated final line becomes extractable. Idempotent.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.decode_pending(true);
        if !self.buffer.is_empty() && !self.buffer.ends_with('\n') {
            self.buffer.push('\n');
        }
        self.finished = true;
    }

    /// Extract the next payload from complete lines, skipping keepalives.
    ///
    /// Returns `None` when no complete line with a payload is buffered.
    pub fn next_frame(&mut self) -> Option<Result<Value, ProviderError>> {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            match parse_line(&line) {
                Ok(StreamFrame::Skip) => {
                    trace!(line = line.trim(), "skipping stream line");
                }
                Ok(StreamFrame::Payload(value)) => return Some(Ok(value)),
                Err(err) => {
                    return Some(Err(ProviderError::Protocol {
                        status: self.status,
                        message: format!("Failed to parse streamed response chunk: {}", err),
                    }));
                }
            }
        }
        None
    }

    /// Bytes buffered but not yet resolved into a line
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    fn decode_pending(&mut self, flush: bool) {
        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    start = self.pending.len();
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&self.pending[start..valid_end]) {
                        self.buffer.push_str(valid);
                    }
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None if flush => {
                            self.buffer.push(REPLACEMENT_CHARACTER);
                            start = self.pending.len();
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
    }
}

/// Decode a live byte stream into JSON frames.
///
/// The returned stream is lazy: nothing is read until it is polled. Dropping
/// it drops `source`, releasing the underlying connection. When `cancel`
/// fires the stream yields [`ProviderError::Cancelled`] and stops reading.
pub fn decode_frames<S, E>(source: S, status: u16, cancel: CancellationToken) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let frames = async_stream::try_stream! {
        let mut source = Box::pin(source);
        let mut decoder = FrameDecoder::new(status);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                next = source.next() => Ok(next),
            };

            match next? {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| {
                        ProviderError::Network(format!("Stream read failed: {}", e))
                    })?;
                    decoder.push(&chunk);
                    while let Some(frame) = decoder.next_frame() {
                        yield frame?;
                    }
                }
                None => {
                    decoder.finish();
                    while let Some(frame) = decoder.next_frame() {
                        yield frame?;
                    }
                    debug!(status, "stream finished");
                    break;
                }
            }
        }
    };

    Box::pin(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(decoder: &mut FrameDecoder) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(frame) = decoder.next_frame() {
            out.push(frame.unwrap());
        }
        out
    }

    // ── Line classification ─────────────────────────────────────────

    #[test]
    fn test_parse_line_skips() {
        for line in ["", "   ", ": keepalive", "event: ping", "id: 7", "retry: 100", "data:", "data: ", "data: [DONE]", "[DONE]"] {
            assert_eq!(parse_line(line).unwrap(), StreamFrame::Skip, "line {:?}", line);
        }
    }

    #[test]
    fn test_parse_line_payloads() {
        assert_eq!(
            parse_line(r#"data: {"a":1}"#).unwrap(),
            StreamFrame::Payload(json!({"a": 1}))
        );
        assert_eq!(
            parse_line(r#"data:{"a":1}"#).unwrap(),
            StreamFrame::Payload(json!({"a": 1}))
        );
        assert_eq!(
            parse_line("  {\"b\":2}\r").unwrap(),
            StreamFrame::Payload(json!({"b": 2}))
        );
    }

    #[test]
    fn test_sentinel_is_case_sensitive() {
        assert!(parse_line("data: [done]").is_err());
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(parse_line("data: {oops").is_err());
        assert!(parse_line("hello").is_err());
    }

    // ── Decoder state ───────────────────────────────────────────────

    #[test]
    fn test_sse_scenario_yields_single_frame() {
        let mut decoder = FrameDecoder::new(200);
        decoder.push(b"data: {\"candidates\":[{\"index\":0}]}\n\nevent: ping\ndata: [DONE]\n");
        decoder.finish();
        assert_eq!(drain(&mut decoder), vec![json!({"candidates": [{"index": 0}]})]);
    }

    #[test]
    fn test_partial_line_waits_for_terminator() {
        let mut decoder = FrameDecoder::new(200);
        decoder.push(b"{\"a\":");
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), "{\"a\":");
        decoder.push(b"1}\n{\"b\"");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), json!({"a": 1}));
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), "{\"b\"");
    }

    #[test]
    fn test_trailing_line_without_newline_is_flushed() {
        let mut decoder = FrameDecoder::new(200);
        decoder.push(b"{\"a\":1}\n{\"b\":2}");
        assert_eq!(drain(&mut decoder), vec![json!({"a": 1})]);
        decoder.finish();
        assert_eq!(drain(&mut decoder), vec![json!({"b": 2})]);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut decoder = FrameDecoder::new(200);
        decoder.push(b"{\"a\":1}");
        decoder.finish();
        decoder.finish();
        assert_eq!(drain(&mut decoder), vec![json!({"a": 1})]);
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_split_multibyte_character() {
        let text = "{\"t\":\"héllo\"}\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut decoder = FrameDecoder::new(200);
        decoder.push(&text[..split]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&text[split..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), json!({"t": "héllo"}));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut decoder = FrameDecoder::new(200);
        decoder.push(b"{\"t\":\"a\xffb\"}\n");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), json!({"t": "a\u{fffd}b"}));
    }

    #[test]
    fn test_protocol_error_carries_status() {
        let mut decoder = FrameDecoder::new(206);
        decoder.push(b"data: {not json}\n");
        match decoder.next_frame() {
            Some(Err(ProviderError::Protocol { status, message })) => {
                assert_eq!(status, 206);
                assert!(message.contains("Failed to parse streamed response chunk"));
            }
            other => panic!("Expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_event_then_data_in_same_read() {
        let mut decoder = FrameDecoder::new(200);
        decoder.push(b"event: message_start\ndata: {\"n\":1}\nevent: delta\ndata: {\"n\":2}\n");
        assert_eq!(drain(&mut decoder), vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn test_crlf_lines() {
        let mut decoder = FrameDecoder::new(200);
        decoder.push(b"data: {\"n\":1}\r\n\r\ndata: [DONE]\r\n");
        assert_eq!(drain(&mut decoder), vec![json!({"n": 1})]);
    }
}

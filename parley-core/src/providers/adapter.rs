//! Provider adapter trait
//!
//! Every upstream is wrapped in a [`ChatAdapter`]: it owns its transport,
//! maps a [`ChatTurn`] into the provider's request payload and extracts the
//! reply text. Adapters hold no per-request mutable state, so one instance is
//! shared across concurrent router calls.

use crate::http::{Transport, TransportRequest};
use crate::protocol::{ChatTurn, Message, ProviderDescriptor, StreamChunk};
use crate::providers::error::{ProviderError, ProviderResult};
use crate::stream::{ChunkStream, FrameStream};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Cheap health endpoint of an adapter
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    /// Transport the probe is sent through (credentials included)
    pub transport: Transport,

    /// GET or HEAD
    pub method: Method,

    /// Relative path of the health endpoint
    pub path: String,

    /// Extra headers for the probe
    pub headers: HeaderMap,
}

impl ProbeTarget {
    /// Probe `path` with GET
    pub fn get(transport: Transport, path: impl Into<String>) -> Self {
        Self {
            transport,
            method: Method::GET,
            path: path.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Probe `path` with HEAD
    pub fn head(transport: Transport, path: impl Into<String>) -> Self {
        Self {
            method: Method::HEAD,
            ..Self::get(transport, path)
        }
    }

    /// Build the transport request for this probe
    pub fn to_request(&self) -> TransportRequest {
        let mut request = TransportRequest::new(self.method.clone(), &self.path);
        request.headers = self.headers.clone();
        request
    }
}

/// Core trait that all chat providers implement
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Static description of the provider
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Stable provider id
    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Send the turn and return the assistant reply
    async fn send_message(&self, turn: &ChatTurn) -> ProviderResult<Message>;

    /// Send the turn, turning any failure into an error-tagged message.
    ///
    /// The failure text reads `"<Label> error: <message>"`.
    async fn respond(&self, turn: &ChatTurn) -> Message {
        match self.send_message(turn).await {
            Ok(message) => message,
            Err(err) => {
                let detail = err.to_string();
                Message::failure(
                    format!("{} error: {}", self.descriptor().label, detail),
                    err.kind().as_str(),
                    detail,
                )
            }
        }
    }

    /// Stream the reply as text chunks
    async fn stream_message(
        &self,
        _turn: &ChatTurn,
        _cancel: CancellationToken,
    ) -> ProviderResult<ChunkStream> {
        Err(ProviderError::Unsupported(self.descriptor().id.clone()))
    }

    /// Health endpoint, if the provider exposes one
    fn probe(&self) -> Option<ProbeTarget> {
        None
    }
}

/// Map decoded frames to text chunks with a provider-specific extractor.
///
/// Frames the extractor yields nothing for (role headers, usage blocks,
/// pings) are dropped.
pub fn chunk_frames<F>(frames: FrameStream, extract: F) -> ChunkStream
where
    F: Fn(&Value) -> Option<String> + Send + 'static,
{
    Box::pin(frames.filter_map(move |frame| {
        let chunk = match frame {
            Ok(frame) => extract(&frame).map(|delta| Ok(StreamChunk::new(delta, frame))),
            Err(err) => Some(Err(err)),
        };
        futures::future::ready(chunk)
    }))
}

/// Join the `text` fields of an array of content parts
pub fn join_text_parts<'a>(parts: impl IntoIterator<Item = &'a Value>) -> String {
    parts
        .into_iter()
        .filter_map(|part| match part {
            Value::String(text) => Some(text.as_str()),
            other => other.get("text").and_then(Value::as_str),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProviderDescriptor;
    use serde_json::json;

    struct Failing(ProviderDescriptor);

    #[async_trait]
    impl ChatAdapter for Failing {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.0
        }

        async fn send_message(&self, _turn: &ChatTurn) -> ProviderResult<Message> {
            Err(ProviderError::Network("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_respond_converts_error_to_message() {
        let adapter = Failing(ProviderDescriptor::new("openai", "OpenAI"));
        let reply = adapter.respond(&ChatTurn::fresh("hi")).await;
        assert_eq!(reply.content, "OpenAI error: Network error: connection reset");
        assert!(reply.is_error());
        assert_eq!(reply.error_kind(), Some("upstream_error"));
    }

    #[tokio::test]
    async fn test_default_stream_is_unsupported() {
        let adapter = Failing(ProviderDescriptor::new("x", "X"));
        let result = adapter
            .stream_message(&ChatTurn::fresh("hi"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProviderError::Unsupported(id)) if id == "x"));
        assert!(adapter.probe().is_none());
    }

    #[test]
    fn test_join_text_parts() {
        let parts = json!([{"type": "text", "text": "Hello"}, {"type": "image"}, " world"]);
        assert_eq!(join_text_parts(parts.as_array().unwrap()), "Hello world");
    }

    #[tokio::test]
    async fn test_chunk_frames_drops_empty_frames() {
        let frames: FrameStream = Box::pin(futures::stream::iter(vec![
            Ok(json!({"t": "a"})),
            Ok(json!({"other": true})),
            Ok(json!({"t": "b"})),
        ]));
        let chunks: Vec<_> = chunk_frames(frames, |v| v["t"].as_str().map(String::from))
            .collect()
            .await;
        let deltas: Vec<_> = chunks.into_iter().map(|c| c.unwrap().delta).collect();
        assert_eq!(deltas, vec!["a", "b"]);
    }
}

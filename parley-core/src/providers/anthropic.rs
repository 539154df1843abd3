//! Anthropic Messages API adapter
//!
//! Sends `POST v1/messages` with the `x-api-key` credential header and a
//! pinned `anthropic-version`. Streaming replies arrive as SSE events; only
//! `content_block_delta` events carry text.

use crate::http::{Transport, TransportRequest};
use crate::protocol::{ChatTurn, Message, ProviderDescriptor, Sender, StreamChunk};
use crate::providers::adapter::{ChatAdapter, ProbeTarget};
use crate::providers::error::{ProviderError, ProviderResult};
use crate::stream::ChunkStream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version sent in `anthropic-version`
pub const API_VERSION: &str = "2023-06-01";

/// Name of the credential header
pub const API_KEY_HEADER: &str = "x-api-key";

/// Default model when none is configured
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";

const DEFAULT_MAX_TOKENS: u32 = 1024;

/// A message in Anthropic wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

/// `v1/messages` request body
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `v1/messages` response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One block of response content
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A server-sent event payload; the variant is chosen by `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {},
    ContentBlockStart {},
    ContentBlockDelta { delta: Delta },
    ContentBlockStop {},
    MessageDelta {},
    MessageStop,
    Ping,
    Error { error: StreamErrorBody },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamErrorBody {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

/// Adapter for the Anthropic Messages API
pub struct AnthropicAdapter {
    descriptor: ProviderDescriptor,
    transport: Transport,
    model: String,
    max_tokens: u32,
    system: Option<String>,
}

impl AnthropicAdapter {
    /// Create an adapter. The transport must carry an `x-api-key` credential.
    pub fn new(descriptor: ProviderDescriptor, transport: Transport) -> Self {
        Self {
            descriptor,
            transport,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: None,
        }
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the completion token limit
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set a system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    fn map_history(turn: &ChatTurn) -> Vec<AnthropicMessage> {
        let mut messages: Vec<AnthropicMessage> = turn
            .history
            .iter()
            .map(|message| AnthropicMessage {
                role: match message.sender {
                    Sender::Client => "user".to_string(),
                    Sender::Assistant => "assistant".to_string(),
                },
                content: message.content.clone(),
            })
            .collect();
        messages.push(AnthropicMessage {
            role: "user".to_string(),
            content: turn.input.clone(),
        });
        messages
    }

    /// The Messages API has no seed or JSON mode; only the system prompt
    /// of the turn options applies
    fn build_request(&self, turn: &ChatTurn, stream: bool) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: Self::map_history(turn),
            system: turn
                .options
                .system_prompt
                .clone()
                .or_else(|| self.system.clone()),
            stream,
            extra: Map::new(),
        }
    }

    fn call(&self, turn: &ChatTurn, stream: bool) -> ProviderResult<TransportRequest> {
        let body = serde_json::to_value(self.build_request(turn, stream))?;
        let mut request = TransportRequest::post("v1/messages")
            .json(body)
            .header("anthropic-version", HeaderValue::from_static(API_VERSION));
        if stream {
            request = request.header("accept", HeaderValue::from_static("text/event-stream"));
        }
        Ok(request)
    }
}

/// Convert one SSE payload into an optional chunk
fn event_chunk(frame: Value) -> Option<ProviderResult<StreamChunk>> {
    match serde_json::from_value::<StreamEvent>(frame.clone()) {
        Ok(StreamEvent::ContentBlockDelta { delta }) => delta
            .text
            .filter(|text| !text.is_empty())
            .map(|text| Ok(StreamChunk::new(text, frame))),
        Ok(StreamEvent::Error { error }) => {
            warn!(kind = %error.kind, "stream reported an error event");
            Some(Err(ProviderError::Protocol {
                status: 200,
                message: error.message,
            }))
        }
        Ok(_) => None,
        Err(err) => {
            debug!(error = %err, "ignoring unrecognised stream event");
            None
        }
    }
}

#[async_trait]
impl ChatAdapter for AnthropicAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn send_message(&self, turn: &ChatTurn) -> ProviderResult<Message> {
        debug!(provider = %self.descriptor.id, model = %self.model, "sending message");
        let value = self.transport.request(self.call(turn, false)?, None).await?;
        let response: MessagesResponse = serde_json::from_value(value)?;

        let content: String = response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        let mut message = Message::assistant(content);
        if let Some(reason) = response.stop_reason {
            message = message.with_metadata("stop_reason", Value::String(reason));
        }
        Ok(message)
    }

    async fn stream_message(
        &self,
        turn: &ChatTurn,
        cancel: CancellationToken,
    ) -> ProviderResult<ChunkStream> {
        let frames = self.transport.stream(self.call(turn, true)?, cancel).await?;
        Ok(Box::pin(frames.filter_map(|frame| {
            futures::future::ready(match frame {
                Ok(frame) => event_chunk(frame),
                Err(err) => Some(Err(err)),
            })
        })))
    }

    fn probe(&self) -> Option<ProbeTarget> {
        let mut target = ProbeTarget::get(self.transport.clone(), "v1/models");
        target
            .headers
            .insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TurnOptions;
    use serde_json::json;

    #[test]
    fn test_map_history_appends_input() {
        let turn = ChatTurn::new(vec![Message::assistant("hello")], "hi");
        let mapped = AnthropicAdapter::map_history(&turn);
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].role, "assistant");
        assert_eq!(mapped[1], AnthropicMessage { role: "user".into(), content: "hi".into() });
        assert_eq!(mapped, AnthropicAdapter::map_history(&turn));
    }

    #[test]
    fn test_turn_system_prompt_overrides_configured_one() {
        let transport = Transport::new(
            crate::http::TransportConfig::parse(DEFAULT_BASE_URL).unwrap(),
        )
        .unwrap();
        let adapter = AnthropicAdapter::new(ProviderDescriptor::new("anthropic", "Anthropic"), transport)
            .with_system("configured");

        let plain = adapter.build_request(&ChatTurn::fresh("x"), false);
        assert_eq!(plain.system.as_deref(), Some("configured"));

        let turn = ChatTurn::fresh("x").with_options(
            TurnOptions::default().with_system_prompt("per turn").json().with_seed(1),
        );
        let body = serde_json::to_value(adapter.build_request(&turn, true)).unwrap();
        assert_eq!(body["system"], "per turn");
        assert_eq!(body["stream"], true);
        assert!(body.get("seed").is_none());
    }

    #[test]
    fn test_event_chunk_extracts_text_delta() {
        let frame = json!({"type": "content_block_delta", "index": 0,
                           "delta": {"type": "text_delta", "text": "Hi"}});
        let chunk = event_chunk(frame).unwrap().unwrap();
        assert_eq!(chunk.delta, "Hi");
    }

    #[test]
    fn test_event_chunk_skips_bookkeeping_events() {
        assert!(event_chunk(json!({"type": "ping"})).is_none());
        assert!(event_chunk(json!({"type": "message_stop"})).is_none());
        assert!(event_chunk(json!({"type": "message_start", "message": {}})).is_none());
        assert!(event_chunk(json!({"type": "something_new"})).is_none());
    }

    #[test]
    fn test_event_chunk_surfaces_error_event() {
        let frame = json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}});
        match event_chunk(frame) {
            Some(Err(ProviderError::Protocol { message, .. })) => assert_eq!(message, "Overloaded"),
            other => panic!("Expected error, got {:?}", other),
        }
    }
}

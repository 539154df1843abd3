//! Adapter for plain text-generation endpoints
//!
//! `POST v1/text/generate` answers `{"text": ..}`; `POST v1/text/stream`
//! emits SSE frames carrying `{"text": ..}` deltas.

use crate::http::{Transport, TransportRequest};
use crate::protocol::{ChatTurn, Message, ProviderDescriptor, Sender};
use crate::providers::adapter::{chunk_frames, ChatAdapter};
use crate::providers::error::ProviderResult;
use crate::stream::ChunkStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub role: String,
    pub content: String,
}

/// Request body shared by the generate and stream endpoints
#[derive(Debug, Clone, Serialize)]
pub struct TextRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<TextMessage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reply body; also the shape of each streamed frame
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub usage: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Adapter for generic text generation services
pub struct TextAdapter {
    descriptor: ProviderDescriptor,
    transport: Transport,
    model: Option<String>,
}

impl TextAdapter {
    /// Create an adapter over a transport bound to the service root
    pub fn new(descriptor: ProviderDescriptor, transport: Transport) -> Self {
        Self {
            descriptor,
            transport,
            model: None,
        }
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn build_request(&self, turn: &ChatTurn) -> TextRequest {
        let messages = turn
            .history
            .iter()
            .map(|message| TextMessage {
                role: match message.sender {
                    Sender::Client => "user".to_string(),
                    Sender::Assistant => "assistant".to_string(),
                },
                content: message.content.clone(),
            })
            .collect();

        let mut extra = Map::new();
        if let Some(system) = &turn.options.system_prompt {
            extra.insert("system".to_string(), Value::String(system.clone()));
        }
        if turn.options.json_mode {
            extra.insert("response_format".to_string(), json!({"type": "json_object"}));
        }
        if let Some(seed) = turn.options.seed {
            extra.insert("seed".to_string(), Value::from(seed));
        }

        TextRequest {
            model: self.model.clone(),
            prompt: turn.input.clone(),
            messages,
            extra,
        }
    }

    fn call(&self, path: &str, turn: &ChatTurn) -> ProviderResult<TransportRequest> {
        Ok(TransportRequest::post(path).json(serde_json::to_value(self.build_request(turn))?))
    }
}

#[async_trait]
impl ChatAdapter for TextAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn send_message(&self, turn: &ChatTurn) -> ProviderResult<Message> {
        debug!(provider = %self.descriptor.id, "generating text");
        let value = self
            .transport
            .request(self.call("v1/text/generate", turn)?, None)
            .await?;
        let response: TextResponse = serde_json::from_value(value)?;

        let mut message = Message::assistant(response.text);
        if let Some(usage) = response.usage {
            message = message.with_metadata("usage", usage);
        }
        Ok(message)
    }

    async fn stream_message(
        &self,
        turn: &ChatTurn,
        cancel: CancellationToken,
    ) -> ProviderResult<ChunkStream> {
        let frames = self
            .transport
            .stream(self.call("v1/text/stream", turn)?, cancel)
            .await?;
        Ok(chunk_frames(frames, |frame| {
            frame
                .get("text")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        }))
    }
}

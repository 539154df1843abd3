//! OpenAI-compatible chat completions adapter
//!
//! Covers OpenAI itself and the services that mirror its
//! `POST chat/completions` shape (OpenRouter, DeepSeek, local gateways).

use crate::http::{Transport, TransportRequest};
use crate::protocol::{ChatTurn, Message, ProviderDescriptor, Sender};
use crate::providers::adapter::{chunk_frames, join_text_parts, ChatAdapter, ProbeTarget};
use crate::providers::error::ProviderResult;
use crate::stream::ChunkStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default model when none is configured
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// A role-tagged message in OpenAI wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionMessage {
    pub role: String,
    pub content: Value,
}

/// `chat/completions` request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    /// Provider-specific parameters passed through verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `chat/completions` response body (also used for stream frames)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceContent>,
    #[serde(default)]
    pub delta: Option<ChoiceContent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceContent {
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChoiceContent {
    /// Content as text; either a plain string or an array of parts
    pub fn text(&self) -> Option<String> {
        match self.content.as_ref()? {
            Value::String(text) => Some(text.clone()),
            Value::Array(parts) => Some(join_text_parts(parts)),
            _ => None,
        }
    }
}

/// Adapter for OpenAI-style chat completion endpoints
pub struct OpenAiCompatAdapter {
    descriptor: ProviderDescriptor,
    transport: Transport,
    model: String,
    extra: Map<String, Value>,
}

impl OpenAiCompatAdapter {
    /// Create an adapter over a transport bound to the API base URL
    pub fn new(descriptor: ProviderDescriptor, transport: Transport) -> Self {
        Self {
            descriptor,
            transport,
            model: DEFAULT_MODEL.to_string(),
            extra: Map::new(),
        }
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Add a request parameter such as `temperature`
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    fn map_history(turn: &ChatTurn) -> Vec<ChatCompletionMessage> {
        let system = turn
            .options
            .system_prompt
            .as_ref()
            .map(|prompt| ChatCompletionMessage {
                role: "system".to_string(),
                content: Value::String(prompt.clone()),
            });

        system
            .into_iter()
            .chain(turn.history.iter().map(|message| ChatCompletionMessage {
                role: match message.sender {
                    Sender::Client => "user",
                    Sender::Assistant => "assistant",
                }
                .to_string(),
                content: Value::String(message.content.clone()),
            }))
            .chain(std::iter::once(ChatCompletionMessage {
                role: "user".to_string(),
                content: Value::String(turn.input.clone()),
            }))
            .collect()
    }

    fn build_request(&self, turn: &ChatTurn, stream: bool) -> ChatCompletionRequest {
        let mut extra = self.extra.clone();
        if turn.options.json_mode {
            extra.insert("response_format".to_string(), json!({"type": "json_object"}));
        }
        if let Some(seed) = turn.options.seed {
            extra.insert("seed".to_string(), Value::from(seed));
        }

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::map_history(turn),
            stream,
            extra,
        }
    }

    fn call(&self, turn: &ChatTurn, stream: bool) -> ProviderResult<TransportRequest> {
        let body = serde_json::to_value(self.build_request(turn, stream))?;
        Ok(TransportRequest::post("chat/completions").json(body))
    }
}

/// Text delta of a streamed completion frame
fn delta_text(frame: &Value) -> Option<String> {
    let response: ChatCompletionResponse = serde_json::from_value(frame.clone()).ok()?;
    let text = response.choices.first()?.delta.as_ref()?.text()?;
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl ChatAdapter for OpenAiCompatAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn send_message(&self, turn: &ChatTurn) -> ProviderResult<Message> {
        debug!(provider = %self.descriptor.id, model = %self.model, "sending chat completion");
        let value = self.transport.request(self.call(turn, false)?, None).await?;
        let response: ChatCompletionResponse = serde_json::from_value(value)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .and_then(ChoiceContent::text)
            .unwrap_or_default();

        Ok(Message::assistant(content))
    }

    async fn stream_message(
        &self,
        turn: &ChatTurn,
        cancel: CancellationToken,
    ) -> ProviderResult<ChunkStream> {
        let frames = self.transport.stream(self.call(turn, true)?, cancel).await?;
        Ok(chunk_frames(frames, delta_text))
    }

    fn probe(&self) -> Option<ProbeTarget> {
        Some(ProbeTarget::get(self.transport.clone(), "models"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TurnOptions;

    #[test]
    fn test_map_history_roles_and_input() {
        let turn = ChatTurn::new(
            vec![Message::client("hi"), Message::assistant("hello")],
            "how are you?",
        );
        let mapped = OpenAiCompatAdapter::map_history(&turn);
        let roles: Vec<_> = mapped.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(mapped[2].content, json!("how are you?"));
    }

    #[test]
    fn test_map_history_is_idempotent() {
        let turn = ChatTurn::new(vec![Message::client("a")], "b");
        assert_eq!(
            OpenAiCompatAdapter::map_history(&turn),
            OpenAiCompatAdapter::map_history(&turn)
        );
        assert_eq!(turn.history.len(), 1);
    }

    #[test]
    fn test_request_serialization_flattens_params() {
        let transport = Transport::new(
            crate::http::TransportConfig::parse("https://api.openai.com/v1").unwrap(),
        )
        .unwrap();
        let adapter = OpenAiCompatAdapter::new(ProviderDescriptor::new("openai", "OpenAI"), transport)
            .with_param("temperature", json!(0.2));
        let body = serde_json::to_value(adapter.build_request(&ChatTurn::fresh("x"), false)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.2);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_turn_options_map_to_request_fields() {
        let transport = Transport::new(
            crate::http::TransportConfig::parse("https://openrouter.ai/api/v1").unwrap(),
        )
        .unwrap();
        let adapter = OpenAiCompatAdapter::new(ProviderDescriptor::new("openrouter", "OpenRouter"), transport);
        let turn = ChatTurn::new(vec![Message::assistant("earlier")], "list colours").with_options(
            TurnOptions::default()
                .json()
                .with_system_prompt("Reply in JSON")
                .with_seed(42),
        );

        let body = serde_json::to_value(adapter.build_request(&turn, false)).unwrap();
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
        assert_eq!(body["seed"], 42);
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "Reply in JSON"}));
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["messages"][2]["content"], "list colours");

        let plain = serde_json::to_value(adapter.build_request(&ChatTurn::fresh("x"), false)).unwrap();
        assert!(plain.get("response_format").is_none());
        assert!(plain.get("seed").is_none());
    }

    #[test]
    fn test_content_parts_are_joined() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": [{"text": "Hel"}, {"text": "lo"}]}}]
        }))
        .unwrap();
        assert_eq!(response.choices[0].message.as_ref().unwrap().text().unwrap(), "Hello");
    }

    #[test]
    fn test_delta_text() {
        assert_eq!(
            delta_text(&json!({"choices": [{"delta": {"content": "Hi"}}]})),
            Some("Hi".to_string())
        );
        assert_eq!(delta_text(&json!({"choices": [{"delta": {"role": "assistant"}}]})), None);
        assert_eq!(delta_text(&json!({"usage": {}})), None);
    }
}

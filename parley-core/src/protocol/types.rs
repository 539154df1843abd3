//! Core protocol types for chat interactions
//!
//! This module contains the data structures exchanged between callers,
//! the router and provider adapters. The design prioritizes:
//! - Immutability of replies once they leave the router
//! - Forward compatibility through an open metadata map
//! - A single message shape for both successful and failed outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Metadata key carrying the human-readable failure description.
pub const ERROR_METADATA_KEY: &str = "error";

/// Metadata key carrying the failure classification.
pub const ERROR_KIND_METADATA_KEY: &str = "error_kind";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The human side of the conversation
    Client,
    /// The model (or the router speaking on its behalf)
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: String,

    /// Author of the message
    pub sender: Sender,

    /// Text content
    pub content: String,

    /// Provider that actually served the reply
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider_id: Option<String>,

    /// Provider originally requested when a fallback served the reply
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fallback_from_provider_id: Option<String>,

    /// Provider-specific metadata, including the error tag
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub metadata: HashMap<String, Value>,
}

impl Message {
    /// Create a message with a fresh identifier
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            sender,
            content: content.into(),
            provider_id: None,
            fallback_from_provider_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Create a client-authored message
    pub fn client(content: impl Into<String>) -> Self {
        Self::new(Sender::Client, content)
    }

    /// Create an assistant-authored message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, content)
    }

    /// Create an assistant message describing a failure.
    ///
    /// `kind` is stored under [`ERROR_KIND_METADATA_KEY`] and `detail` under
    /// [`ERROR_METADATA_KEY`].
    pub fn failure(content: impl Into<String>, kind: &str, detail: impl Into<String>) -> Self {
        Self::assistant(content)
            .with_metadata(ERROR_METADATA_KEY, Value::String(detail.into()))
            .with_metadata(ERROR_KIND_METADATA_KEY, Value::String(kind.to_string()))
    }

    /// Attach the serving provider
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Attach the provider the request fell back from
    pub fn with_fallback_from(mut self, provider_id: impl Into<String>) -> Self {
        self.fallback_from_provider_id = Some(provider_id.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this message reports a failure
    pub fn is_error(&self) -> bool {
        self.metadata.contains_key(ERROR_METADATA_KEY)
    }

    /// The failure description, if any
    pub fn error_text(&self) -> Option<&str> {
        self.metadata.get(ERROR_METADATA_KEY).and_then(Value::as_str)
    }

    /// The failure classification, if any
    pub fn error_kind(&self) -> Option<&str> {
        self.metadata
            .get(ERROR_KIND_METADATA_KEY)
            .and_then(Value::as_str)
    }
}

fn new_message_id() -> String {
    format!("resp-{}", Uuid::new_v4())
}

/// One conversational turn handed to an adapter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Prior messages, oldest first. Never mutated by the client layer.
    #[serde(default)]
    pub history: Vec<Message>,

    /// New free-text input appended as the final turn
    pub input: String,

    /// Per-call generation options
    #[serde(default, skip_serializing_if = "TurnOptions::is_empty")]
    pub options: TurnOptions,
}

/// Per-call options an adapter maps onto its wire format.
///
/// Options a provider has no equivalent for are ignored by that adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TurnOptions {
    /// Ask for a JSON object reply
    #[serde(default)]
    pub json_mode: bool,

    /// System prompt for this call; overrides one set on the adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Sampling seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl TurnOptions {
    /// Request a JSON object reply
    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the sampling seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Whether no option is set
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl ChatTurn {
    /// Create a turn from history and input
    pub fn new(history: Vec<Message>, input: impl Into<String>) -> Self {
        Self {
            history,
            input: input.into(),
            options: TurnOptions::default(),
        }
    }

    /// Attach per-call options
    pub fn with_options(mut self, options: TurnOptions) -> Self {
        self.options = options;
        self
    }

    /// Create a turn with no prior history
    pub fn fresh(input: impl Into<String>) -> Self {
        Self::new(Vec::new(), input)
    }
}

/// Static description of a registered provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Stable unique key
    pub id: String,

    /// Display label
    pub label: String,

    /// Whether the provider can drive a voice session
    #[serde(default)]
    pub supports_voice: bool,
}

impl ProviderDescriptor {
    /// Create a descriptor for a text-only provider
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            supports_voice: false,
        }
    }

    /// Mark the provider as voice capable
    pub fn with_voice(mut self, supports_voice: bool) -> Self {
        self.supports_voice = supports_voice;
        self
    }
}

/// An incremental piece of a streamed reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text extracted from the frame (may be empty for non-text frames)
    pub delta: String,

    /// The decoded upstream frame
    pub frame: Value,
}

impl StreamChunk {
    /// Create a chunk from a text delta and its source frame
    pub fn new(delta: impl Into<String>, frame: Value) -> Self {
        Self {
            delta: delta.into(),
            frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::assistant("a");
        let b = Message::assistant("b");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("resp-"));
    }

    #[test]
    fn test_failure_message_is_tagged() {
        let msg = Message::failure("Error from x: boom", "upstream_error", "boom");
        assert!(msg.is_error());
        assert_eq!(msg.error_text(), Some("boom"));
        assert_eq!(msg.error_kind(), Some("upstream_error"));
        assert_eq!(msg.sender, Sender::Assistant);
    }

    #[test]
    fn test_plain_message_is_not_error() {
        let msg = Message::client("hi");
        assert!(!msg.is_error());
        assert_eq!(msg.error_text(), None);
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let msg = Message::client("hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["sender"], json!("client"));
        assert!(value.get("provider_id").is_none());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_turn_options_default_to_empty() {
        let turn: ChatTurn = serde_json::from_value(json!({"input": "hi"})).unwrap();
        assert!(turn.options.is_empty());
        assert!(serde_json::to_value(&turn).unwrap().get("options").is_none());

        let turn = ChatTurn::fresh("hi").with_options(TurnOptions::default().with_seed(7));
        assert!(!turn.options.is_empty());
        assert_eq!(serde_json::to_value(&turn).unwrap()["options"], json!({"json_mode": false, "seed": 7}));
    }

    #[test]
    fn test_message_deserializes_with_missing_optionals() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m1",
            "sender": "assistant",
            "content": "hello"
        }))
        .unwrap();
        assert_eq!(msg.content, "hello");
        assert!(msg.provider_id.is_none());
        assert!(msg.metadata.is_empty());
    }
}

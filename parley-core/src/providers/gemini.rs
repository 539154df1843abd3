//! Gemini adapter for the Vertex AI `generateContent` family
//!
//! Model calls live under
//! `v1/projects/{project}/locations/{location}/publishers/google/models/{model}:{action}`
//! with every variable segment escaped. Streaming uses
//! `streamGenerateContent` with `Accept: application/x-ndjson`; the decoder
//! also copes with the SSE framing Vertex sends when `alt=sse` is set.

use crate::http::{Transport, TransportRequest};
use crate::protocol::{ChatTurn, Message, ProviderDescriptor, Sender};
use crate::providers::adapter::{chunk_frames, ChatAdapter};
use crate::providers::error::ProviderResult;
use crate::stream::ChunkStream;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default model when none is configured
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Default Vertex region
pub const DEFAULT_LOCATION: &str = "us-central1";

/// Regional Vertex endpoint for `location`
pub fn default_base_url(location: &str) -> String {
    format!("https://{}-aiplatform.googleapis.com", location)
}

/// Project, region and model addressed by the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexModel {
    pub project: String,
    pub location: String,
    pub model: String,
}

impl VertexModel {
    /// Address `model` in `project` at the default region
    pub fn new(project: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            location: DEFAULT_LOCATION.to_string(),
            model: model.into(),
        }
    }

    /// Override the region
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Build the request path for `action`
    fn request(&self, action: &str) -> TransportRequest {
        TransportRequest::post("v1/projects")
            .segment(&self.project)
            .segment("locations")
            .segment(&self.location)
            .segment("publishers")
            .segment("google")
            .segment("models")
            .segment(format!("{}:{}", self.model, action))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part {
                text: Some(text.to_string()),
                extra: Map::new(),
            }],
        }
    }
}

/// `generateContent` request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `generateContent` response body, and each streamed frame
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenerateContentResponse {
    /// Concatenated text of every candidate part
    pub fn text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|candidate| candidate.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}

/// Adapter for Gemini models on Vertex AI
pub struct GeminiAdapter {
    descriptor: ProviderDescriptor,
    transport: Transport,
    target: VertexModel,
    system_instruction: Option<String>,
    generation_config: Option<Value>,
}

impl GeminiAdapter {
    /// Create an adapter. The transport carries the OAuth bearer token.
    pub fn new(descriptor: ProviderDescriptor, transport: Transport, target: VertexModel) -> Self {
        Self {
            descriptor,
            transport,
            target,
            system_instruction: None,
            generation_config: None,
        }
    }

    /// Set a system instruction
    pub fn with_system_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(text.into());
        self
    }

    /// Set `generationConfig` (temperature, max output tokens, ...)
    pub fn with_generation_config(mut self, config: Value) -> Self {
        self.generation_config = Some(config);
        self
    }

    fn map_history(turn: &ChatTurn) -> Vec<Content> {
        turn.history
            .iter()
            .map(|message| {
                let role = match message.sender {
                    Sender::Client => "user",
                    Sender::Assistant => "model",
                };
                Content::text(role, &message.content)
            })
            .chain(std::iter::once(Content::text("user", &turn.input)))
            .collect()
    }

    fn build_request(&self, turn: &ChatTurn) -> GenerateContentRequest {
        let system_instruction = turn
            .options
            .system_prompt
            .as_deref()
            .or(self.system_instruction.as_deref())
            .map(|text| Content::text("system", text));

        GenerateContentRequest {
            contents: Self::map_history(turn),
            system_instruction,
            generation_config: self.generation_config_for(turn),
            extra: Map::new(),
        }
    }

    /// Configured generation config with the turn's JSON mode and seed
    /// layered on top
    fn generation_config_for(&self, turn: &ChatTurn) -> Option<Value> {
        let options = &turn.options;
        if !options.json_mode && options.seed.is_none() {
            return self.generation_config.clone();
        }

        let mut config = match &self.generation_config {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        if options.json_mode {
            config.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
        }
        if let Some(seed) = options.seed {
            config.insert("seed".to_string(), Value::from(seed));
        }
        Some(Value::Object(config))
    }

    fn call(&self, turn: &ChatTurn, action: &str) -> ProviderResult<TransportRequest> {
        let body = serde_json::to_value(self.build_request(turn))?;
        Ok(self.target.request(action).json(body))
    }
}

fn frame_text(frame: &Value) -> Option<String> {
    let response: GenerateContentResponse = serde_json::from_value(frame.clone()).ok()?;
    let text = response.text();
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl ChatAdapter for GeminiAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn send_message(&self, turn: &ChatTurn) -> ProviderResult<Message> {
        debug!(provider = %self.descriptor.id, model = %self.target.model, "generating content");
        let request = self
            .call(turn, "generateContent")?
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        let value = self.transport.request(request, None).await?;
        let response: GenerateContentResponse = serde_json::from_value(value)?;

        let mut message = Message::assistant(response.text().trim());
        if let Some(reason) = response
            .candidates
            .first()
            .and_then(|candidate| candidate.finish_reason.clone())
        {
            message = message.with_metadata("finish_reason", Value::String(reason));
        }
        Ok(message)
    }

    async fn stream_message(
        &self,
        turn: &ChatTurn,
        cancel: CancellationToken,
    ) -> ProviderResult<ChunkStream> {
        let request = self
            .call(turn, "streamGenerateContent")?
            .header(ACCEPT, HeaderValue::from_static("application/x-ndjson"));
        let frames = self.transport.stream(request, cancel).await?;
        Ok(chunk_frames(frames, frame_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::TransportConfig;
    use crate::protocol::TurnOptions;
    use serde_json::json;

    #[test]
    fn test_default_base_url() {
        assert_eq!(
            default_base_url("europe-west4"),
            "https://europe-west4-aiplatform.googleapis.com"
        );
    }

    #[test]
    fn test_model_path_is_escaped() {
        let transport = Transport::new(
            TransportConfig::parse(&default_base_url(DEFAULT_LOCATION)).unwrap(),
        )
        .unwrap();
        let target = VertexModel::new("my project", "gemini-1.5-pro");
        let url = transport.build_url(&target.request("generateContent")).unwrap();
        assert_eq!(
            url.path(),
            "/v1/projects/my%20project/locations/us-central1/publishers/google/models/gemini-1.5-pro:generateContent"
        );
    }

    #[test]
    fn test_map_history_uses_model_role() {
        let turn = ChatTurn::new(vec![Message::client("q"), Message::assistant("a")], "next");
        let roles: Vec<_> = GeminiAdapter::map_history(&turn)
            .into_iter()
            .map(|c| c.role.unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    #[test]
    fn test_turn_options_layer_onto_generation_config() {
        let transport = Transport::new(
            TransportConfig::parse(&default_base_url(DEFAULT_LOCATION)).unwrap(),
        )
        .unwrap();
        let adapter = GeminiAdapter::new(
            ProviderDescriptor::new("gemini", "Gemini"),
            transport,
            VertexModel::new("p", DEFAULT_MODEL),
        )
        .with_system_instruction("configured")
        .with_generation_config(json!({"temperature": 0.1}));

        let plain = serde_json::to_value(adapter.build_request(&ChatTurn::fresh("x"))).unwrap();
        assert_eq!(plain["generationConfig"], json!({"temperature": 0.1}));
        assert_eq!(plain["systemInstruction"]["parts"][0]["text"], "configured");

        let turn = ChatTurn::fresh("x").with_options(
            TurnOptions::default().json().with_seed(9).with_system_prompt("per turn"),
        );
        let body = serde_json::to_value(adapter.build_request(&turn)).unwrap();
        assert_eq!(
            body["generationConfig"],
            json!({"temperature": 0.1, "responseMimeType": "application/json", "seed": 9})
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "per turn");
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}, {"text": "lo"}]}}],
            "usageMetadata": {"totalTokenCount": 3}
        }))
        .unwrap();
        assert_eq!(response.text(), "Hello");
        assert!(response.extra.contains_key("usageMetadata"));
    }

    #[test]
    fn test_frame_text_skips_empty_frames() {
        assert_eq!(frame_text(&json!({"candidates": [{"index": 0}]})), None);
        assert_eq!(
            frame_text(&json!({"candidates": [{"content": {"parts": [{"text": "x"}]}}]})),
            Some("x".to_string())
        );
    }
}

//! Configuration schema structures with serde support

use super::error::{ConfigError, ValidationError, ValidationErrorKind};
use super::secrets::SecretString;
use crate::http::{default_client, Credential, Transport, TransportConfig};
use crate::protocol::ProviderDescriptor;
use crate::providers::adapter::ChatAdapter;
use crate::providers::probe::{HttpProber, DEFAULT_PROBE_TIMEOUT};
use crate::providers::retry::RetryPolicy;
use crate::providers::routing::{Router, SendOptions, DEFAULT_TIMEOUT};
use crate::providers::{
    anthropic, gemini, openai, AnthropicAdapter, GeminiAdapter, OpenAiCompatAdapter,
    ProviderRegistry, TextAdapter, VertexModel,
};
use reqwest::header::HeaderName;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Supported configuration schema version
pub const SCHEMA_VERSION: &str = "0.1";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// Schema version (required - no default)
    pub version: String,

    /// Providers, in registration order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Routing defaults
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// Upstream provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Unique provider id
    pub id: String,

    /// Display label
    pub label: String,

    /// Wire protocol spoken by the provider
    pub kind: ProviderKind,

    /// API base URL; defaults per kind when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Credential (supports environment variable interpolation)
    #[serde(default)]
    pub api_key: SecretString,

    /// Model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Whether the provider can drive a voice session
    #[serde(default)]
    pub supports_voice: bool,

    /// Whether the provider is registered
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Transport timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Transport retry policy; no retries when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    /// Vertex project (gemini only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Vertex region (gemini only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Extra request parameters passed through to the provider
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

/// Supported provider wire protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-style `chat/completions`
    OpenaiCompat,
    /// Anthropic Messages API
    Anthropic,
    /// Gemini on Vertex AI
    Gemini,
    /// Plain text generation endpoints
    Text,
}

/// Routing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Per-call timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Probe providers before invoking them
    #[serde(default = "default_true")]
    pub check_availability: bool,

    /// Fallback order; every other provider in declaration order when empty
    #[serde(default)]
    pub fallback_order: Vec<String>,

    /// Timeout of a single availability probe in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            check_availability: true,
            fallback_order: Vec::new(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool { true }
fn default_timeout_ms() -> u64 { DEFAULT_TIMEOUT.as_millis() as u64 }
fn default_probe_timeout_ms() -> u64 { DEFAULT_PROBE_TIMEOUT.as_millis() as u64 }

impl ParleyConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version.is_empty() {
            return Err(ValidationError::required("version"));
        }

        if self.version != SCHEMA_VERSION {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::InvalidVersion {
                    expected: SCHEMA_VERSION.to_string(),
                    actual: self.version.clone(),
                },
            ));
        }

        if self.providers.is_empty() {
            return Err(ValidationError::required("providers")
                .with_context("At least one provider must be configured"));
        }

        let mut seen_ids = HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if !seen_ids.insert(provider.id.as_str()) {
                return Err(ValidationError::new(
                    format!("providers[{}].id", i),
                    ValidationErrorKind::DuplicateValue {
                        value: provider.id.clone(),
                    },
                ));
            }
            provider.validate(&format!("providers[{}]", i))?;
        }

        self.routing.validate("routing")?;

        let enabled_ids: HashSet<&str> = self
            .enabled_providers()
            .map(|provider| provider.id.as_str())
            .collect();
        for (i, id) in self.routing.fallback_order.iter().enumerate() {
            let path = format!("routing.fallback_order[{}]", i);
            if !seen_ids.contains(id.as_str()) {
                return Err(ValidationError::invalid_value(
                    path,
                    "declared provider id",
                    id.clone(),
                ));
            }
            if !enabled_ids.contains(id.as_str()) {
                return Err(ValidationError::new(
                    path,
                    ValidationErrorKind::Incompatible {
                        message: format!("provider '{}' is disabled", id),
                    },
                ));
            }
        }

        Ok(())
    }

    /// Providers that will be registered
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|provider| provider.enabled)
    }

    /// Build adapters for every enabled provider, sharing one connection pool
    pub fn build_registry(&self) -> Result<ProviderRegistry, ConfigError> {
        let client = default_client().map_err(|e| ConfigError::invalid(e.to_string()))?;
        let mut registry = ProviderRegistry::new();
        for provider in self.enabled_providers() {
            registry.register_arc(provider.build_adapter(client.clone())?);
        }
        info!(providers = registry.len(), "provider registry built");
        Ok(registry)
    }

    /// Build a router over [`build_registry`](Self::build_registry) probing
    /// over HTTP
    pub fn build_router(&self) -> Result<Router, ConfigError> {
        let registry = Arc::new(self.build_registry()?);
        let prober = HttpProber::new(Arc::clone(&registry))
            .with_timeout(Duration::from_millis(self.routing.probe_timeout_ms));
        Ok(Router::new(registry, Arc::new(prober)))
    }

    /// Send options for a request whose desired provider is `mode`
    ///
    /// Only enabled providers are ever offered as fallbacks.
    pub fn send_options(&self, mode: &str) -> SendOptions {
        let fallback_order: Vec<String> = if self.routing.fallback_order.is_empty() {
            self.enabled_providers()
                .map(|provider| provider.id.clone())
                .filter(|id| id != mode)
                .collect()
        } else {
            self.routing
                .fallback_order
                .iter()
                .filter(|id| self.enabled_providers().any(|provider| &provider.id == *id))
                .cloned()
                .collect()
        };

        SendOptions::new()
            .with_timeout(Duration::from_millis(self.routing.timeout_ms))
            .with_availability_check(self.routing.check_availability)
            .with_fallback_order(fallback_order)
    }
}

impl ProviderConfig {
    /// Validate provider configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::required(format!("{}.id", path)));
        }

        if self.label.trim().is_empty() {
            return Err(ValidationError::required(format!("{}.label", path)));
        }

        match &self.base_url {
            Some(base_url) => validate_url(&format!("{}.base_url", path), base_url)?,
            None if self.kind == ProviderKind::Text => {
                return Err(ValidationError::required(format!("{}.base_url", path))
                    .with_context("Text providers have no default endpoint"));
            }
            None => {}
        }

        if self.kind == ProviderKind::Gemini
            && self.project.as_deref().map_or(true, |p| p.trim().is_empty())
        {
            return Err(ValidationError::required(format!("{}.project", path))
                .with_context("Gemini providers address a Vertex project"));
        }

        if self.timeout_ms == Some(0) {
            return Err(ValidationError::out_of_range(
                format!("{}.timeout_ms", path),
                "Must be greater than 0",
            ));
        }

        if let Some(retry) = &self.retry {
            validate_retry(&format!("{}.retry", path), retry)?;
        }

        if self.kind == ProviderKind::Anthropic {
            if let Some(value) = self.params.get("max_tokens") {
                if self.max_tokens().is_none() {
                    return Err(ValidationError::out_of_range(
                        format!("{}.params.max_tokens", path),
                        format!("Must be an integer between 1 and {}, got {}", u32::MAX, value),
                    ));
                }
            }
        }

        Ok(())
    }

    /// `params.max_tokens` as a positive 32-bit count
    fn max_tokens(&self) -> Option<u32> {
        self.params
            .get("max_tokens")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
    }

    /// Descriptor for this provider
    pub fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new(&self.id, &self.label).with_voice(self.supports_voice)
    }

    /// Configured base URL, or the kind's default endpoint
    pub fn resolved_base_url(&self) -> Result<String, ConfigError> {
        if let Some(base_url) = &self.base_url {
            return Ok(base_url.clone());
        }
        match self.kind {
            ProviderKind::OpenaiCompat => Ok("https://api.openai.com/v1".to_string()),
            ProviderKind::Anthropic => Ok(anthropic::DEFAULT_BASE_URL.to_string()),
            ProviderKind::Gemini => Ok(gemini::default_base_url(
                self.location.as_deref().unwrap_or(gemini::DEFAULT_LOCATION),
            )),
            ProviderKind::Text => Err(ConfigError::invalid(format!(
                "provider '{}' has no base_url",
                self.id
            ))),
        }
    }

    /// Credential header for this provider's kind; `None` when no key is set
    pub fn credential(&self) -> Option<Credential> {
        if self.api_key.is_blank() {
            return None;
        }
        Some(match self.kind {
            ProviderKind::Anthropic => Credential::header(
                HeaderName::from_static(anthropic::API_KEY_HEADER),
                self.api_key.clone(),
            ),
            _ => Credential::Bearer(self.api_key.clone()),
        })
    }

    /// Transport settings for this provider
    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        let mut config = TransportConfig::parse(&self.resolved_base_url()?)
            .map_err(|e| ConfigError::invalid(e.to_string()))?;
        if let Some(credential) = self.credential() {
            config = config.with_credential(credential);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(retry) = &self.retry {
            config = config.with_retry(retry.clone());
        }
        Ok(config)
    }

    /// Build the adapter, sharing `client`'s connection pool
    pub fn build_adapter(&self, client: reqwest::Client) -> Result<Arc<dyn ChatAdapter>, ConfigError> {
        let transport = Transport::with_client(client, self.transport_config()?);
        let descriptor = self.descriptor();
        debug!(provider = %self.id, kind = ?self.kind, key = %self.api_key.partial_redact(), "building adapter");

        let adapter: Arc<dyn ChatAdapter> = match self.kind {
            ProviderKind::OpenaiCompat => {
                let mut adapter = OpenAiCompatAdapter::new(descriptor, transport)
                    .with_model(self.model.as_deref().unwrap_or(openai::DEFAULT_MODEL));
                for (key, value) in &self.params {
                    adapter = adapter.with_param(key.clone(), value.clone());
                }
                Arc::new(adapter)
            }
            ProviderKind::Anthropic => {
                let mut adapter = AnthropicAdapter::new(descriptor, transport)
                    .with_model(self.model.as_deref().unwrap_or(anthropic::DEFAULT_MODEL));
                if let Some(value) = self.params.get("max_tokens") {
                    let max_tokens = self.max_tokens().ok_or_else(|| {
                        ConfigError::invalid(format!(
                            "provider '{}' has invalid max_tokens {}",
                            self.id, value
                        ))
                    })?;
                    adapter = adapter.with_max_tokens(max_tokens);
                }
                if let Some(system) = self.params.get("system").and_then(Value::as_str) {
                    adapter = adapter.with_system(system);
                }
                Arc::new(adapter)
            }
            ProviderKind::Gemini => {
                let project = self.project.clone().unwrap_or_default();
                let mut target = VertexModel::new(
                    project,
                    self.model.as_deref().unwrap_or(gemini::DEFAULT_MODEL),
                );
                if let Some(location) = &self.location {
                    target = target.with_location(location);
                }
                let mut adapter = GeminiAdapter::new(descriptor, transport, target);
                if let Some(config) = self.params.get("generation_config") {
                    adapter = adapter.with_generation_config(config.clone());
                }
                Arc::new(adapter)
            }
            ProviderKind::Text => {
                let mut adapter = TextAdapter::new(descriptor, transport);
                if let Some(model) = &self.model {
                    adapter = adapter.with_model(model);
                }
                Arc::new(adapter)
            }
        };

        Ok(adapter)
    }
}

impl RoutingConfig {
    /// Validate routing configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.timeout_ms", path),
                "Must be greater than 0",
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.probe_timeout_ms", path),
                "Must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn validate_url(path: &str, value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(()),
        Ok(url) => Err(ValidationError::new(
            path,
            ValidationErrorKind::InvalidUrl {
                message: format!("URL scheme must be http or https, got: {}", url.scheme()),
            },
        )),
        Err(e) => Err(ValidationError::new(
            path,
            ValidationErrorKind::InvalidUrl {
                message: e.to_string(),
            },
        )),
    }
}

fn validate_retry(path: &str, retry: &RetryPolicy) -> Result<(), ValidationError> {
    if retry.max_retries > 0 && retry.initial_delay_ms == 0 {
        return Err(ValidationError::out_of_range(
            format!("{}.initial_delay_ms", path),
            "Must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ValidationError::new(
            format!("{}.max_delay_ms", path),
            ValidationErrorKind::Incompatible {
                message: "Must be >= initial_delay_ms".to_string(),
            },
        ));
    }

    if retry.exponential_base < 1.0 {
        return Err(ValidationError::out_of_range(
            format!("{}.exponential_base", path),
            "Must be at least 1.0",
        ));
    }

    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        return Err(ValidationError::out_of_range(
            format!("{}.jitter_factor", path),
            "Must be between 0.0 and 1.0",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: &str, kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            label: id.to_uppercase(),
            kind,
            base_url: Some("https://api.example.com".to_string()),
            api_key: SecretString::new("key"),
            model: None,
            supports_voice: false,
            enabled: true,
            timeout_ms: None,
            retry: None,
            project: Some("p".to_string()),
            location: None,
            params: Map::new(),
        }
    }

    fn config(providers: Vec<ProviderConfig>) -> ParleyConfig {
        ParleyConfig {
            version: SCHEMA_VERSION.to_string(),
            providers,
            routing: RoutingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let cfg = config(vec![
            provider("a", ProviderKind::OpenaiCompat),
            provider("b", ProviderKind::Text),
        ]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let cfg = config(vec![
            provider("a", ProviderKind::OpenaiCompat),
            provider("a", ProviderKind::Anthropic),
        ]);
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field_path, "providers[1].id");
    }

    #[test]
    fn test_unknown_fallback_rejected() {
        let mut cfg = config(vec![provider("a", ProviderKind::OpenaiCompat)]);
        cfg.routing.fallback_order = vec!["ghost".to_string()];
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field_path, "routing.fallback_order[0]");
    }

    #[test]
    fn test_text_provider_requires_base_url() {
        let mut text = provider("t", ProviderKind::Text);
        text.base_url = None;
        let err = config(vec![text]).validate().unwrap_err();
        assert_eq!(err.field_path, "providers[0].base_url");
    }

    #[test]
    fn test_gemini_base_url_from_location() {
        let mut g = provider("g", ProviderKind::Gemini);
        g.base_url = None;
        g.location = Some("europe-west4".to_string());
        assert_eq!(
            g.resolved_base_url().unwrap(),
            "https://europe-west4-aiplatform.googleapis.com"
        );
    }

    #[test]
    fn test_anthropic_uses_api_key_header() {
        let credential = provider("c", ProviderKind::Anthropic).credential().unwrap();
        assert_eq!(credential.header_name().as_str(), "x-api-key");

        let mut keyless = provider("o", ProviderKind::OpenaiCompat);
        keyless.api_key = SecretString::new("");
        assert!(keyless.credential().is_none());
    }

    #[test]
    fn test_send_options_default_fallback_order() {
        let mut off = provider("c", ProviderKind::Text);
        off.enabled = false;
        let cfg = config(vec![
            provider("a", ProviderKind::OpenaiCompat),
            provider("b", ProviderKind::Text),
            off,
        ]);
        assert_eq!(cfg.send_options("a").fallback_order, vec!["b"]);
    }

    #[test]
    fn test_retry_ranges() {
        let mut p = provider("a", ProviderKind::OpenaiCompat);
        p.retry = Some(RetryPolicy {
            jitter_factor: 1.5,
            ..RetryPolicy::default()
        });
        let err = config(vec![p]).validate().unwrap_err();
        assert_eq!(err.field_path, "providers[0].retry.jitter_factor");
    }
}

//! Provider availability probing
//!
//! Probes are cheap health checks issued before routing a request. They
//! never fail: any problem reaching the health endpoint reads as
//! "unavailable", and a provider without a health endpoint reads as
//! "available".

use crate::providers::registry::ProviderRegistry;
use crate::providers::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, CACHE_CONTROL};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers whether a provider can currently take requests
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    /// Whether `provider_id` is reachable and configured
    async fn is_available(&self, provider_id: &str) -> bool;
}

/// Probe that issues each adapter's health request over HTTP
#[derive(Debug, Clone)]
pub struct HttpProber {
    registry: Arc<ProviderRegistry>,
    timeout: Duration,
}

impl HttpProber {
    /// Create a prober over the adapters in `registry`
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Override the per-probe timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AvailabilityProbe for HttpProber {
    async fn is_available(&self, provider_id: &str) -> bool {
        let Some(target) = self
            .registry
            .find(provider_id)
            .and_then(|adapter| adapter.probe())
        else {
            debug!(provider = %provider_id, "no health endpoint, assuming available");
            return true;
        };

        let request = target
            .to_request()
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .with_timeout(self.timeout)
            .with_retry(RetryPolicy::no_retry());

        match target.transport.raw(request, None).await {
            Ok(response) => {
                debug!(provider = %provider_id, status = response.status().as_u16(), "probe succeeded");
                true
            }
            Err(err) => {
                warn!(provider = %provider_id, error = %err, "probe failed");
                false
            }
        }
    }
}

/// Probe backed by an explicit set of unavailable providers
#[derive(Debug, Default)]
pub struct StaticProbe {
    unavailable: RwLock<HashSet<String>>,
}

impl StaticProbe {
    /// Every provider available
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the given providers unavailable
    pub fn down<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unavailable: RwLock::new(ids.into_iter().map(Into::into).collect()),
        }
    }

    /// Change the availability of one provider
    pub fn set_available(&self, provider_id: &str, available: bool) {
        if let Ok(mut unavailable) = self.unavailable.write() {
            if available {
                unavailable.remove(provider_id);
            } else {
                unavailable.insert(provider_id.to_string());
            }
        }
    }
}

#[async_trait]
impl AvailabilityProbe for StaticProbe {
    async fn is_available(&self, provider_id: &str) -> bool {
        self.unavailable
            .read()
            .map(|unavailable| !unavailable.contains(provider_id))
            .unwrap_or(true)
    }
}

/// Canonical answer of a server-side health endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReply {
    /// HTTP status to send
    pub status: u16,

    /// `Content-Type` header, when a body is sent
    pub content_type: Option<&'static str>,

    /// `Cache-Control` header
    pub cache_control: &'static str,

    /// Response body
    pub body: Option<String>,
}

impl HealthReply {
    /// 204 with no body when `value` holds a non-blank credential, else 500
    /// with a `text/plain` explanation naming `env_name`
    pub fn for_credential(label: &str, env_name: &str, value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(value) if !value.is_empty() => Self {
                status: 204,
                content_type: None,
                cache_control: "no-store",
                body: None,
            },
            _ => Self {
                status: 500,
                content_type: Some("text/plain"),
                cache_control: "no-store",
                body: Some(format!(
                    "{} API key is not configured. Set {} on the server.",
                    label, env_name
                )),
            },
        }
    }

    /// Same as [`for_credential`](Self::for_credential), reading `env_name`
    /// from the process environment
    pub fn from_env(label: &str, env_name: &str) -> Self {
        let value = std::env::var(env_name).ok();
        Self::for_credential(label, env_name, value.as_deref())
    }

    /// Whether the reply reports a healthy provider
    pub fn is_healthy(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

//! HTTP transport for upstream provider APIs
//!
//! This module implements the HTTP layer for Parley, handling:
//! - URL composition with escaped path segments and query values
//! - Default/per-call header merging and credential injection
//! - Body serialization (JSON, raw text/bytes, forms, multipart)
//! - Error mapping of non-2xx responses
//! - Request ID generation and correlation

pub mod client;
pub mod error;

pub use client::{default_client, Transport, TransportConfig};
pub use error::{extract_error_message, map_http_error, parse_retry_after};

use crate::config::SecretString;
use crate::providers::retry::RetryPolicy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, IntoHeaderName, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

/// Credential attached to outgoing requests
#[derive(Debug, Clone)]
pub enum Credential {
    /// `Authorization: Bearer <token>`
    Bearer(SecretString),
    /// A provider-specific API-key header such as `x-api-key`
    Header {
        /// Header name
        name: HeaderName,
        /// Raw header value
        value: SecretString,
    },
}

impl Credential {
    /// Create a bearer credential
    pub fn bearer(token: impl Into<SecretString>) -> Self {
        Self::Bearer(token.into())
    }

    /// Create an API-key header credential
    pub fn header(name: HeaderName, value: impl Into<SecretString>) -> Self {
        Self::Header {
            name,
            value: value.into(),
        }
    }

    /// Name of the header this credential occupies
    pub fn header_name(&self) -> HeaderName {
        match self {
            Self::Bearer(_) => AUTHORIZATION,
            Self::Header { name, .. } => name.clone(),
        }
    }

    /// Render the header, or `None` when the secret is empty or not a valid
    /// header value
    pub fn to_header(&self) -> Option<(HeaderName, HeaderValue)> {
        let (name, raw) = match self {
            Self::Bearer(token) if !token.expose_secret().trim().is_empty() => (
                AUTHORIZATION,
                format!("Bearer {}", token.expose_secret().trim()),
            ),
            Self::Header { name, value } if !value.expose_secret().trim().is_empty() => {
                (name.clone(), value.expose_secret().trim().to_string())
            }
            _ => return None,
        };

        let mut value = HeaderValue::from_str(&raw).ok()?;
        value.set_sensitive(true);
        Some((name, value))
    }
}

/// Body of an outgoing request
#[derive(Debug, Default)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// Serialized as JSON with `Content-Type: application/json`
    Json(Value),
    /// Sent verbatim (already serialized)
    Text(String),
    /// Sent verbatim
    Bytes(bytes::Bytes),
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// `multipart/form-data`; cannot be replayed on retry
    Multipart(reqwest::multipart::Form),
}

impl RequestBody {
    /// Clone the body if it can be sent more than once
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Json(value) => Some(Self::Json(value.clone())),
            Self::Text(text) => Some(Self::Text(text.clone())),
            Self::Bytes(bytes) => Some(Self::Bytes(bytes.clone())),
            Self::Form(pairs) => Some(Self::Form(pairs.clone())),
            Self::Multipart(_) => None,
        }
    }

    /// Whether the transport should add `Content-Type: application/json`
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

/// A single call against a provider base URL
#[derive(Debug)]
pub struct TransportRequest {
    /// HTTP method
    pub method: Method,

    /// Path segments appended to the base URL; each one is escaped
    pub path: Vec<String>,

    /// Query pairs; values are escaped
    pub query: Vec<(String, String)>,

    /// Request body
    pub body: RequestBody,

    /// Per-call headers, overriding the transport defaults
    pub headers: HeaderMap,

    /// Per-call timeout, overriding the transport default
    pub timeout: Option<Duration>,

    /// Per-call retry policy, overriding the transport default
    pub retry: Option<RetryPolicy>,
}

impl TransportRequest {
    /// Create a request for a `/`-separated relative path
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
            body: RequestBody::Empty,
            headers: HeaderMap::new(),
            timeout: None,
            retry: None,
        }
    }

    /// Create a GET request
    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    /// Create a POST request
    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    /// Append one path segment; `/` inside it is escaped rather than split
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.path.push(segment.into());
        self
    }

    /// Append a query pair
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a JSON body
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Set any body
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Set a per-call header
    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a per-call retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

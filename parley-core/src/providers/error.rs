//! Provider error types and handling

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Normalized failure classification surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The provider failed its health probe
    Unavailable,
    /// The call exceeded its deadline
    Timeout,
    /// The upstream sent something that could not be decoded
    ProtocolError,
    /// The upstream (or the network in front of it) reported a failure
    UpstreamError,
}

impl ProviderErrorKind {
    /// Stable string form, used as the message error tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::ProtocolError => "protocol_error",
            Self::UpstreamError => "upstream_error",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body captured from a failed HTTP response
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    /// The body parsed as JSON
    Json(Value),
    /// The body was not JSON
    Text(String),
}

/// A non-2xx HTTP response
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HttpError {
    /// HTTP status code
    pub status: u16,

    /// Canonical reason phrase for the status
    pub status_text: String,

    /// Best-effort captured body
    pub body: Option<ErrorBody>,

    /// Human-readable message extracted from the body
    pub message: String,

    /// Server-requested delay before retrying
    pub retry_after: Option<Duration>,
}

impl HttpError {
    /// Whether the status indicates a transient condition
    pub fn is_transient(&self) -> bool {
        matches!(self.status, 408 | 429) || (500..=599).contains(&self.status)
    }
}

/// Errors that can occur when interacting with providers
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Upstream answered with a non-2xx status
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Connection or body-read failure
    #[error("Network error: {0}")]
    Network(String),

    /// A response body could not be decoded
    #[error("{message} (status {status})")]
    Protocol { status: u16, message: String },

    /// Provider failed its availability probe
    #[error("Provider {0} is unavailable")]
    Unavailable(String),

    /// Deadline exceeded
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The caller cancelled the request
    #[error("Request was cancelled")]
    Cancelled,

    /// The adapter has no streaming endpoint
    #[error("Provider {0} does not support streaming")]
    Unsupported(String),

    /// The adapter cannot proceed with its configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A request body could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ProviderError {
    /// Map this error onto the normalized failure taxonomy
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Unavailable(_) => ProviderErrorKind::Unavailable,
            Self::Timeout(_) => ProviderErrorKind::Timeout,
            Self::Protocol { .. } => ProviderErrorKind::ProtocolError,
            Self::Http(_)
            | Self::Network(_)
            | Self::Cancelled
            | Self::Unsupported(_)
            | Self::Configuration(_)
            | Self::Serialization(_) => ProviderErrorKind::UpstreamError,
        }
    }

    /// Determine if the same request may succeed when repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => err.is_transient(),
            Self::Network(_) => true,
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Server-suggested delay before retrying, if any
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Http(err) => err.retry_after,
            _ => None,
        }
    }

    /// HTTP status associated with this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(err) => Some(err.status),
            Self::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Convert a reqwest failure, reporting `timeout` when it expired
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_connect() {
            Self::Network(format!("Connection failed: {}", err))
        } else if err.is_decode() || err.is_body() {
            Self::Network(format!("Failed to read response body: {}", err))
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Attach the provider id to produce a normalized failure
    pub fn into_failure(self, provider_id: impl Into<String>) -> ProviderFailure {
        ProviderFailure {
            provider_id: provider_id.into(),
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Serialization(err.to_string())
    }
}

/// A failure normalized for presentation, tagged with its provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    /// Provider involved in the failure
    pub provider_id: String,

    /// Failure classification
    pub kind: ProviderErrorKind,

    /// Human-readable description
    pub message: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.provider_id, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> HttpError {
        HttpError {
            status,
            status_text: String::new(),
            body: None,
            message: format!("Request failed with status {}", status),
            retry_after: None,
        }
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            ProviderError::Timeout(Duration::from_secs(1)).kind(),
            ProviderErrorKind::Timeout
        );
        assert_eq!(
            ProviderError::Protocol {
                status: 200,
                message: "bad".into()
            }
            .kind(),
            ProviderErrorKind::ProtocolError
        );
        assert_eq!(
            ProviderError::Unavailable("a".into()).kind(),
            ProviderErrorKind::Unavailable
        );
        assert_eq!(
            ProviderError::Http(http(400)).kind(),
            ProviderErrorKind::UpstreamError
        );
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(ProviderError::Http(http(429)).is_retryable());
        assert!(ProviderError::Http(http(503)).is_retryable());
        assert!(!ProviderError::Http(http(400)).is_retryable());
        assert!(!ProviderError::Http(http(401)).is_retryable());
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(!ProviderError::Cancelled.is_retryable());
    }

    #[test]
    fn test_http_display_is_message_only() {
        let mut err = http(400);
        err.message = "Invalid model".to_string();
        assert_eq!(ProviderError::Http(err).to_string(), "Invalid model");
    }

    #[test]
    fn test_into_failure() {
        let failure = ProviderError::Timeout(Duration::from_millis(250)).into_failure("gemini");
        assert_eq!(failure.provider_id, "gemini");
        assert_eq!(failure.kind, ProviderErrorKind::Timeout);
        assert_eq!(failure.message, "Request timed out after 250ms");
    }
}

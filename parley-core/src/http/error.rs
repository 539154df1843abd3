//! HTTP error mapping utilities

use crate::providers::error::{ErrorBody, HttpError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Map a non-2xx status, its headers and raw body to an [`HttpError`].
///
/// Never fails: malformed or empty bodies degrade to
/// `"Request failed with status <code>"`.
pub fn map_http_error(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> HttpError {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();

    let (body, message) = if trimmed.is_empty() {
        (None, None)
    } else {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(json) => {
                let message = extract_error_message(&json).or_else(|| Some(trimmed.to_string()));
                (Some(ErrorBody::Json(json)), message)
            }
            Err(_) => (
                Some(ErrorBody::Text(trimmed.to_string())),
                Some(trimmed.to_string()),
            ),
        }
    };

    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
        .or_else(|| match &body {
            Some(ErrorBody::Json(json)) => json
                .get("error")
                .and_then(|e| e.get("retry_after"))
                .or_else(|| json.get("retry_after"))
                .and_then(Value::as_u64)
                .map(Duration::from_secs),
            _ => None,
        });

    HttpError {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        body,
        message: message
            .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16())),
        retry_after,
    }
}

/// Extract a human-readable message from conventional error envelopes
pub fn extract_error_message(json: &Value) -> Option<String> {
    // { "error": { "message": "..." } }
    if let Some(message) = json
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        return Some(message.to_string());
    }

    // { "message": "..." }
    if let Some(message) = json.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }

    // { "error": "..." }
    json.get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Parse Retry-After header value
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    // HTTP dates are not supported, only delta-seconds
    header_value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

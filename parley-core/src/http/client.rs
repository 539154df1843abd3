//! HTTP transport implementation using reqwest

use crate::http::error::map_http_error;
use crate::http::{Credential, RequestBody, TransportRequest};
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::retry::{RetryExecutor, RetryPolicy};
use crate::stream::{decode_frames, FrameStream};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder, Method, Response};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Maximum buffered (non-streaming) response size
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Default user agent
const USER_AGENT: &str = concat!("parley/", env!("CARGO_PKG_VERSION"));

/// Per-provider transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL every request path is appended to
    pub base_url: Url,

    /// Headers sent with every request
    pub default_headers: HeaderMap,

    /// Credential attached unless the caller set the same header
    pub credential: Option<Credential>,

    /// Default request timeout
    pub timeout: Duration,

    /// Retry policy for transient failures
    pub retry: RetryPolicy,

    /// Maximum buffered response size
    pub max_response_size: usize,
}

impl TransportConfig {
    /// Create a config for a base URL with no credential and no retries
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            default_headers: HeaderMap::new(),
            credential: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::no_retry(),
            max_response_size: MAX_RESPONSE_SIZE,
        }
    }

    /// Parse the base URL and create a config
    pub fn parse(base_url: &str) -> ProviderResult<Self> {
        let url = Url::parse(base_url).map_err(|e| {
            ProviderError::Configuration(format!("invalid base URL '{}': {}", base_url, e))
        })?;
        Ok(Self::new(url))
    }

    /// Set the credential
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Add a default header
    pub fn with_default_header(mut self, name: &'static str, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Set the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Minimal HTTP wrapper bound to one provider base URL.
///
/// Holds no session state visible to callers; the inner client pools
/// connections and is cheap to clone.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    config: TransportConfig,
}

impl Transport {
    /// Create a transport with its own connection pool
    pub fn new(config: TransportConfig) -> ProviderResult<Self> {
        Ok(Self::with_client(default_client()?, config))
    }

    /// Create a transport sharing an existing client
    pub fn with_client(client: Client, config: TransportConfig) -> Self {
        Self { client, config }
    }

    /// The transport configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether a usable credential is configured
    pub fn has_credential(&self) -> bool {
        self.config
            .credential
            .as_ref()
            .and_then(Credential::to_header)
            .is_some()
    }

    /// Issue a request and parse the JSON body.
    ///
    /// An empty successful body yields `Value::Null`.
    pub async fn request(
        &self,
        request: TransportRequest,
        cancel: Option<&CancellationToken>,
    ) -> ProviderResult<Value> {
        let response = self.raw(request, cancel).await?;
        let status = response.status().as_u16();

        if let Some(length) = response.content_length() {
            if length as usize > self.config.max_response_size {
                return Err(ProviderError::Protocol {
                    status,
                    message: format!(
                        "Response size {} exceeds maximum {}",
                        length, self.config.max_response_size
                    ),
                });
            }
        }

        let timeout = self.config.timeout;
        let bytes = with_cancel(cancel, async {
            response
                .bytes()
                .await
                .map_err(|e| ProviderError::from_reqwest(e, timeout))
        })
        .await?;

        if bytes.len() > self.config.max_response_size {
            return Err(ProviderError::Protocol {
                status,
                message: format!(
                    "Response size {} exceeds maximum {}",
                    bytes.len(),
                    self.config.max_response_size
                ),
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Protocol {
            status,
            message: format!("Failed to parse JSON response: {}", e),
        })
    }

    /// Issue a request and return the unconsumed response.
    ///
    /// Non-2xx statuses are classified into [`ProviderError::Http`] exactly
    /// as in [`request`](Self::request). The timeout covers the whole
    /// exchange, body included.
    pub async fn raw(
        &self,
        request: TransportRequest,
        cancel: Option<&CancellationToken>,
    ) -> ProviderResult<Response> {
        self.dispatch(request, cancel, Deadline::Body).await
    }

    /// Issue a request and decode its body as a frame stream.
    ///
    /// The timeout bounds only the wait for response headers; once the
    /// stream is open it runs until the body ends or `cancel` fires.
    pub async fn stream(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<FrameStream> {
        let response = self.dispatch(request, Some(&cancel), Deadline::Headers).await?;
        let status = response.status().as_u16();
        Ok(decode_frames(response.bytes_stream(), status, cancel))
    }

    async fn dispatch(
        &self,
        request: TransportRequest,
        cancel: Option<&CancellationToken>,
        deadline: Deadline,
    ) -> ProviderResult<Response> {
        let request_id = Uuid::new_v4();
        let url = self.build_url(&request)?;
        let headers = self.compose_headers(&request, request_id);
        let timeout = request.timeout.unwrap_or(self.config.timeout);
        let method = request.method;

        debug!(%method, %url, %request_id, "sending request");

        let policy = if request.body.try_clone().is_none() {
            RetryPolicy::no_retry()
        } else {
            request.retry.unwrap_or_else(|| self.config.retry.clone())
        };

        let executor = RetryExecutor::new(&policy);
        let mut spare = Some(request.body);
        let attempt = executor.execute(|| {
            let body = spare
                .as_ref()
                .and_then(RequestBody::try_clone)
                .or_else(|| spare.take())
                .unwrap_or_default();
            self.send_once(
                method.clone(),
                url.clone(),
                headers.clone(),
                body,
                timeout,
                deadline,
            )
        });

        let response = with_cancel(cancel, async { attempt.await.into_result() }).await?;
        debug!(status = response.status().as_u16(), %request_id, "response received");
        Ok(response)
    }

    /// Resolve base URL + escaped path segments + escaped query
    pub fn build_url(&self, request: &TransportRequest) -> ProviderResult<Url> {
        let mut url = self.config.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ProviderError::Configuration(format!(
                    "base URL '{}' cannot carry a path",
                    self.config.base_url
                ))
            })?;
            segments.pop_if_empty();
            segments.extend(request.path.iter());
        }

        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Merge default and per-call headers, then attach the credential and
    /// JSON content type where the caller did not set them
    pub fn compose_headers(&self, request: &TransportRequest, request_id: Uuid) -> HeaderMap {
        let mut headers = self.config.default_headers.clone();
        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone());
        }

        if let Some((name, value)) = self
            .config
            .credential
            .as_ref()
            .and_then(Credential::to_header)
        {
            if !request.headers.contains_key(&name) {
                headers.insert(name, value);
            }
        }

        if request.body.is_json() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            headers.entry("x-request-id").or_insert(value);
        }

        headers
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: RequestBody,
        timeout: Duration,
        deadline: Deadline,
    ) -> ProviderResult<Response> {
        let mut builder = self.client.request(method, url).headers(headers);
        if deadline == Deadline::Body {
            builder = builder.timeout(timeout);
        }

        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(serde_json::to_vec(&value)?),
            RequestBody::Text(text) => builder.body(text),
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Multipart(form) => builder.multipart(form),
        };

        let sent = match deadline {
            Deadline::Body => builder.send().await,
            Deadline::Headers => tokio::time::timeout(timeout, builder.send())
                .await
                .map_err(|_| ProviderError::Timeout(timeout))?,
        };
        let response = sent.map_err(|e| ProviderError::from_reqwest(e, timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = tokio::time::timeout(timeout, response.bytes())
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();
        let error = map_http_error(status, &headers, &body);
        warn!(status = error.status, message = %error.message, "request failed");
        Err(ProviderError::Http(error))
    }
}

/// What the per-request timeout bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    /// Headers and the full body
    Body,
    /// Headers only; the body is read as a stream
    Headers,
}

/// Build the shared pooled client
pub fn default_client() -> ProviderResult<Client> {
    ClientBuilder::new()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .gzip(true)
        .build()
        .map_err(|e| ProviderError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

async fn with_cancel<T>(
    cancel: Option<&CancellationToken>,
    fut: impl std::future::Future<Output = ProviderResult<T>>,
) -> ProviderResult<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(ProviderError::Cancelled),
            result = fut => result,
        },
        None => fut.await,
    }
}

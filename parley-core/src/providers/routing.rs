//! Provider routing with availability checks and fallback
//!
//! A routed send moves through these states:
//!
//! ```text
//! Selecting -> Probing -> Invoking ---------------------> Succeeded
//!                 |                                   \-> Failed (error message)
//!                 \-> probing fallbacks -> FallbackInvoking -> Succeeded | Failed
//!                                     \-> Exhausted (unavailable message)
//! ```
//!
//! Every outcome except an unregistered provider resolves to a [`Message`],
//! so callers always have something to render.

use crate::protocol::{ChatTurn, Message, StreamChunk};
use crate::providers::adapter::ChatAdapter;
use crate::providers::error::{ProviderError, ProviderErrorKind, ProviderFailure, ProviderResult};
use crate::providers::probe::AvailabilityProbe;
use crate::providers::registry::ProviderRegistry;
use crate::stream::ChunkStream;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default per-call timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Called with `(from, to)` before a fallback provider is invoked
pub type FallbackCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Called with the desired provider id when its probe fails
pub type UnavailableCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Errors that escape the router
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The selected provider is not registered
    #[error("Provider {0} is not registered")]
    UnknownProvider(String),
}

/// Per-call routing options
#[derive(Clone)]
pub struct SendOptions {
    /// Deadline for the provider call
    pub timeout: Duration,

    /// Probe the desired provider before invoking it
    pub check_availability: bool,

    /// Providers tried, in order, when the desired one is unavailable
    pub fallback_order: Vec<String>,

    /// Fallback notification
    pub on_fallback: Option<FallbackCallback>,

    /// Unavailability notification
    pub on_unavailable: Option<UnavailableCallback>,

    /// Caller-driven cancellation
    pub cancel: Option<CancellationToken>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            check_availability: true,
            fallback_order: Vec::new(),
            on_fallback: None,
            on_unavailable: None,
            cancel: None,
        }
    }
}

impl SendOptions {
    /// Options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable the availability check
    pub fn with_availability_check(mut self, enabled: bool) -> Self {
        self.check_availability = enabled;
        self
    }

    /// Set the fallback order
    pub fn with_fallback_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_order = order.into_iter().map(Into::into).collect();
        self
    }

    /// Set the fallback callback
    pub fn on_fallback(mut self, callback: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_fallback = Some(Arc::new(callback));
        self
    }

    /// Set the unavailability callback
    pub fn on_unavailable(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_unavailable = Some(Arc::new(callback));
        self
    }

    /// Attach a cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOptions")
            .field("timeout", &self.timeout)
            .field("check_availability", &self.check_availability)
            .field("fallback_order", &self.fallback_order)
            .field("on_fallback", &self.on_fallback.is_some())
            .field("on_unavailable", &self.on_unavailable.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

/// A streamed reply together with the provider serving it
pub struct RoutedStream {
    /// Provider serving the stream
    pub provider_id: String,

    /// Provider originally requested, when a fallback serves the stream
    pub fallback_from: Option<String>,

    /// Text chunks; failures arrive as a single `Err` item
    pub chunks: ChunkStream,
}

impl fmt::Debug for RoutedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutedStream")
            .field("provider_id", &self.provider_id)
            .field("fallback_from", &self.fallback_from)
            .finish_non_exhaustive()
    }
}

enum Selection {
    Chosen(String),
    Exhausted,
}

/// Routes requests to registered providers
#[derive(Clone)]
pub struct Router {
    registry: Arc<ProviderRegistry>,
    probe: Arc<dyn AvailabilityProbe>,
}

impl Router {
    /// Create a router over `registry`, checking availability with `probe`
    pub fn new(registry: Arc<ProviderRegistry>, probe: Arc<dyn AvailabilityProbe>) -> Self {
        Self { registry, probe }
    }

    /// The providers this router can reach
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Every registered id except `mode`, in registration order
    pub fn default_fallback_order(&self, mode: &str) -> Vec<String> {
        self.registry
            .ids()
            .into_iter()
            .filter(|id| id != mode)
            .collect()
    }

    /// Send a turn to `desired`, falling back when it is unavailable.
    ///
    /// # Errors
    ///
    /// Only [`RouterError::UnknownProvider`]; every provider failure is
    /// reported as an error-tagged message.
    pub async fn send(
        &self,
        desired: &str,
        turn: &ChatTurn,
        options: &SendOptions,
    ) -> Result<Message, RouterError> {
        let chosen = match self.select(desired, options).await {
            Selection::Chosen(id) => id,
            Selection::Exhausted => return Ok(unavailable_message(desired)),
        };
        let adapter = self.resolve(&chosen)?;
        let fallback_from = (chosen != desired).then(|| desired.to_string());

        let started = Instant::now();
        let outcome = race(options, adapter.send_message(turn)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let message = match outcome {
            Ok(message) => {
                info!(provider = %chosen, elapsed_ms, "provider replied");
                message
            }
            Err(err) => {
                warn!(provider = %chosen, elapsed_ms, error = %err, "provider call failed");
                failure_message(err.into_failure(chosen.as_str()))
            }
        };

        let message = message.with_provider(&chosen);
        Ok(match fallback_from {
            Some(from) => message.with_fallback_from(from),
            None => message,
        })
    }

    /// Open a streamed reply with the same selection rules as
    /// [`send`](Self::send). Opening the stream is bounded by the timeout;
    /// failures are delivered as the stream's only item.
    pub async fn stream(
        &self,
        desired: &str,
        turn: &ChatTurn,
        options: &SendOptions,
    ) -> Result<RoutedStream, RouterError> {
        let chosen = match self.select(desired, options).await {
            Selection::Chosen(id) => id,
            Selection::Exhausted => {
                return Ok(RoutedStream {
                    provider_id: desired.to_string(),
                    fallback_from: None,
                    chunks: failed_stream(ProviderError::Unavailable(desired.to_string())),
                });
            }
        };
        let adapter = self.resolve(&chosen)?;
        let cancel = options.cancel.clone().unwrap_or_default();

        let chunks = match race(options, adapter.stream_message(turn, cancel)).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(provider = %chosen, error = %err, "failed to open stream");
                failed_stream(err)
            }
        };

        Ok(RoutedStream {
            fallback_from: (chosen != desired).then(|| desired.to_string()),
            provider_id: chosen,
            chunks,
        })
    }

    async fn select(&self, desired: &str, options: &SendOptions) -> Selection {
        if !options.check_availability || self.probe.is_available(desired).await {
            return Selection::Chosen(desired.to_string());
        }

        info!(provider = %desired, "provider unavailable");
        if let Some(callback) = &options.on_unavailable {
            callback(desired);
        }

        for candidate in &options.fallback_order {
            if candidate == desired {
                continue;
            }
            if self.probe.is_available(candidate).await {
                info!(from = %desired, to = %candidate, "falling back");
                if let Some(callback) = &options.on_fallback {
                    callback(desired, candidate);
                }
                return Selection::Chosen(candidate.clone());
            }
            debug!(provider = %candidate, "fallback candidate unavailable");
        }

        warn!(provider = %desired, "no available provider");
        Selection::Exhausted
    }

    fn resolve(&self, id: &str) -> Result<Arc<dyn ChatAdapter>, RouterError> {
        self.registry
            .find(id)
            .ok_or_else(|| RouterError::UnknownProvider(id.to_string()))
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Terminal message when neither the desired provider nor any fallback is up
fn unavailable_message(desired: &str) -> Message {
    Message::failure(
        format!(
            "Provider {} is unavailable. Please try again later or switch providers.",
            desired
        ),
        ProviderErrorKind::Unavailable.as_str(),
        format!("unavailable:{}", desired),
    )
    .with_provider(desired)
}

/// Assistant reply describing a provider failure
fn failure_message(failure: ProviderFailure) -> Message {
    Message::failure(
        format!("Error from {}: {}", failure.provider_id, failure.message),
        failure.kind.as_str(),
        failure.message,
    )
}

fn failed_stream(err: ProviderError) -> ChunkStream {
    Box::pin(futures::stream::once(async move {
        Err::<StreamChunk, ProviderError>(err)
    }))
}

/// Run `call` against the timeout and the caller's cancellation token
async fn race<T>(
    options: &SendOptions,
    call: impl Future<Output = ProviderResult<T>>,
) -> ProviderResult<T> {
    let timeout = options.timeout;
    let bounded = async move {
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(ProviderError::Timeout(timeout)))
    };

    match &options.cancel {
        Some(cancel) => tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = bounded => result,
        },
        None => bounded.await,
    }
}

//! Provider adapters, registry, availability probing and routing
//!
//! This module implements the layer between callers and upstream APIs:
//! adapters translate a chat turn into each provider's wire format, the
//! registry holds them by id, and the router picks one per request with
//! availability checks, timeouts and fallback ordering.

pub mod adapter;
pub mod anthropic;
pub mod error;
pub mod gemini;
pub mod openai;
pub mod probe;
pub mod registry;
pub mod retry;
pub mod routing;
pub mod text;

pub use adapter::{chunk_frames, ChatAdapter, ProbeTarget};
pub use error::{ErrorBody, HttpError, ProviderError, ProviderErrorKind, ProviderFailure, ProviderResult};
pub use probe::{AvailabilityProbe, HealthReply, HttpProber, StaticProbe};
pub use registry::ProviderRegistry;
pub use retry::{RetryExecutor, RetryPolicy, RetryResult};
pub use routing::{RoutedStream, Router, RouterError, SendOptions};

// Re-export concrete adapters
pub use anthropic::AnthropicAdapter;
pub use gemini::{GeminiAdapter, VertexModel};
pub use openai::OpenAiCompatAdapter;
pub use text::TextAdapter;

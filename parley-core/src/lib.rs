//! Parley Core Library
//!
//! A multi-provider streaming chat client. It calls heterogeneous
//! generative-AI HTTP APIs, decodes their streaming wire formats into one
//! incremental event sequence, and routes each request across
//! interchangeable providers with availability checks, timeouts and
//! fallback ordering.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use parley_core::{config, ChatTurn};
//!
//! let config = config::load("parley.yaml")?;
//! let router = config.build_router()?;
//! let reply = router
//!     .send("openai", &ChatTurn::fresh("Hello"), &config.send_options("openai"))
//!     .await?;
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod http;
pub mod protocol;
pub mod providers;
pub mod stream;

pub use protocol::{ChatTurn, Message, ProviderDescriptor, Sender, StreamChunk, TurnOptions};
pub use providers::{
    ChatAdapter, ProviderError, ProviderRegistry, ProviderResult, RoutedStream, Router,
    RouterError, SendOptions,
};
pub use stream::{decode_frames, ChunkStream, FrameDecoder, FrameStream};

/// Returns the version of the Parley Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

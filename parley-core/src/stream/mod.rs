//! Incremental decoding of streamed provider responses

pub mod decoder;

pub use decoder::{decode_frames, parse_line, FrameDecoder, FrameStream, StreamFrame, DONE_SENTINEL};

use crate::protocol::StreamChunk;
use crate::providers::error::ProviderError;
use futures::Stream;
use std::pin::Pin;

/// Stream of text chunks produced by an adapter
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

//! Protocol module for chat message structures
//!
//! This module defines the provider-agnostic data model shared by callers,
//! the router and every adapter.

pub mod types;

pub use types::{
    ChatTurn, Message, ProviderDescriptor, Sender, StreamChunk, TurnOptions, ERROR_KIND_METADATA_KEY,
    ERROR_METADATA_KEY,
};

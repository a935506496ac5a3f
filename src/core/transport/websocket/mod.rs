//! JSON-framed WebSocket transport variant.

pub mod client;
pub mod messages;

pub use client::{classify_close, WebSocketSession};

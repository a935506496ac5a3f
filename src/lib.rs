//! Realtime voice session engine for property conversations.
//!
//! Streams microphone audio to a cloud speech-to-speech model and renders
//! the model's spoken replies gaplessly, over either a WebSocket or a
//! WebRTC transport, behind one session state machine.

pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use config::EngineConfig;
pub use core::*;
pub use errors::engine_error::{EngineError, EngineResult};

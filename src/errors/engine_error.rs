//! Engine error taxonomy.
//!
//! Every failure inside the engine is expressed as one of these variants and
//! ultimately converted to a single user-facing string at the state machine
//! boundary. Nothing below the session surface panics or leaks a raw error
//! to the caller.

use thiserror::Error;

/// Errors that can occur during a voice session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Microphone or output device unavailable, denied, or lost mid-call
    #[error("Audio device error: {0}")]
    Device(String),

    /// Missing or rejected credential
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Handshake, socket, or signaling failure
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed or unexpected server message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unexpected failure during capture or playback
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// The message surfaced to the UI layer via the state machine's `error`
    /// field.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl From<cpal::DevicesError> for EngineError {
    fn from(err: cpal::DevicesError) -> Self {
        EngineError::Device(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for EngineError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        EngineError::Device(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for EngineError {
    fn from(err: cpal::BuildStreamError) -> Self {
        EngineError::Device(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for EngineError {
    fn from(err: cpal::PlayStreamError) -> Self {
        EngineError::Device(err.to_string())
    }
}

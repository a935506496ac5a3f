//! Error types for the voice session engine.

pub mod engine_error;

pub use engine_error::{EngineError, EngineResult};

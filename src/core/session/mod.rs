//! Session lifecycle: the state machine and the engine that drives it.

pub mod engine;
pub mod state;

pub use engine::{CaptureFactory, PlaybackFactory, TransportFactory, VoiceSessionEngine};
pub use state::SessionState;

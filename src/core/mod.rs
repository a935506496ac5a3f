pub mod audio;
pub mod context;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use audio::{
    AudioFrame, AudioSink, CaptureEvent, CaptureSource, CpalSink, FakeClock, GaplessTimeline,
    MicCapture, NullSink, OutputClock, PlaybackScheduler, ScheduledSpan, SystemClock,
};

pub use transport::{
    create_transport, AudioCallback, BoxedTransport, EventCallback, SessionContext,
    TransportEvent, TransportKind, TransportSession, WebRtcSession, WebSocketSession,
};

pub use context::ContextClient;

pub use session::{SessionState, VoiceSessionEngine};

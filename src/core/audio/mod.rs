//! Audio capture, PCM encoding, and gapless playback.
//!
//! Capture runs at 16kHz mono in fixed 512-sample blocks; playback renders
//! the provider's 24kHz mono output. All samples are f32 in [-1, 1]
//! internally; both wire paths carry 16-bit signed linear PCM.

pub mod capture;
pub mod pcm;
pub mod playback;

pub use capture::{AudioFrame, CaptureEvent, CaptureSource, MicCapture};
pub use playback::{
    AudioSink, CpalSink, FakeClock, GaplessTimeline, NullSink, OutputClock, PlaybackScheduler,
    ScheduledSpan, SystemClock,
};

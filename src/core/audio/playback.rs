//! Gapless playback scheduling.
//!
//! Inbound audio chunks arrive with arbitrary sizes and network jitter. The
//! scheduler renders them as one continuous stream by keeping a monotonically
//! increasing "next scheduled start time" on the output clock: each chunk is
//! scheduled at `max(now, next_start)` and `next_start` advances by the
//! chunk's duration. Chunks are never reordered; if the queue empties,
//! playback pauses until the next chunk arrives (brief silence, never an
//! error).
//!
//! Timing logic lives in [`GaplessTimeline`] with an injected [`OutputClock`]
//! so it can be driven deterministically in tests; the device side is behind
//! the [`AudioSink`] seam (cpal at 24kHz in production, [`NullSink`] in
//! tests).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use crate::config::PLAYBACK_SAMPLE_RATE;
use crate::errors::{EngineError, EngineResult};

// =============================================================================
// Output Clock
// =============================================================================

/// Monotonic clock the timeline schedules against.
pub trait OutputClock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock for deterministic scheduling tests.
pub struct FakeClock {
    now: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Duration::ZERO),
        }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        *self.now.lock() += delta;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for FakeClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

// =============================================================================
// Gapless Timeline
// =============================================================================

/// Start time and duration assigned to one scheduled chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSpan {
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledSpan {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Pure scheduling state: monotonically increasing next-start time.
#[derive(Debug)]
pub struct GaplessTimeline {
    sample_rate: u32,
    next_start: Option<Duration>,
}

impl GaplessTimeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            next_start: None,
        }
    }

    /// Assign a start time to a chunk of `sample_count` mono samples.
    ///
    /// Returns `None` for a zero-length chunk, which is dropped without
    /// scheduling.
    pub fn schedule(&mut self, sample_count: usize, now: Duration) -> Option<ScheduledSpan> {
        if sample_count == 0 {
            return None;
        }
        let duration = Duration::from_secs_f64(sample_count as f64 / self.sample_rate as f64);
        let start = match self.next_start {
            Some(next) => next.max(now),
            None => now,
        };
        self.next_start = Some(start + duration);
        Some(ScheduledSpan { start, duration })
    }

    /// True while scheduled audio has not yet finished on the output clock.
    pub fn is_draining(&self, now: Duration) -> bool {
        self.next_start.is_some_and(|next| now < next)
    }

    /// Forget all scheduled audio (teardown / interruption).
    pub fn reset(&mut self) {
        self.next_start = None;
    }
}

// =============================================================================
// Audio Sink
// =============================================================================

/// Shared FIFO of decoded mono samples awaiting the output device.
pub type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

/// Output device seam. The production sink renders the sample queue on a
/// cpal stream; tests use [`NullSink`].
pub trait AudioSink: Send {
    /// Start rendering from `queue`. Silence is emitted on underrun.
    fn start(&mut self, queue: SampleQueue) -> EngineResult<()>;

    /// Stop rendering and release the output device. Idempotent.
    fn stop(&mut self);
}

/// Sink that discards nothing and renders nothing. Scheduling state still
/// advances on the injected clock, which is all the tests observe.
#[derive(Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn start(&mut self, _queue: SampleQueue) -> EngineResult<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// cpal output sink at the provider's 24kHz output rate.
///
/// `cpal::Stream` is `!Send`, so the stream lives on a dedicated thread that
/// parks until `stop()`.
#[derive(Default)]
pub struct CpalSink {
    handle: Option<SinkHandle>,
}

struct SinkHandle {
    stop_tx: std::sync::mpsc::Sender<()>,
    join: std::thread::JoinHandle<()>,
}

impl AudioSink for CpalSink {
    fn start(&mut self, queue: SampleQueue) -> EngineResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<EngineResult<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name("homevoice-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(queue) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Park until stop is requested or the handle is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| EngineError::Runtime(format!("playback thread spawn failed: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| EngineError::Device("playback thread exited during setup".to_string()))??;

        self.handle = Some(SinkHandle { stop_tx, join });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop_tx.send(());
            if handle.join.join().is_err() {
                tracing::warn!("Playback thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_output_stream(queue: SampleQueue) -> EngineResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| EngineError::Device("No output device available".to_string()))?;

    tracing::info!(
        "Using output device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(PLAYBACK_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut fifo = queue.lock();
            for slot in data.iter_mut() {
                // Underrun renders silence until the next chunk arrives.
                *slot = fifo.pop_front().unwrap_or(0.0);
            }
        },
        move |err| {
            tracing::warn!("Output stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

// =============================================================================
// Playback Scheduler
// =============================================================================

/// Owns the gapless timeline, the device-facing sample queue, and the output
/// sink. One instance per session; torn down with it.
pub struct PlaybackScheduler {
    timeline: Mutex<GaplessTimeline>,
    queue: SampleQueue,
    clock: Arc<dyn OutputClock>,
    sink: Mutex<Box<dyn AudioSink>>,
    closed: std::sync::atomic::AtomicBool,
}

impl PlaybackScheduler {
    /// Start the scheduler with the given sink and clock.
    pub fn start(
        mut sink: Box<dyn AudioSink>,
        clock: Arc<dyn OutputClock>,
    ) -> EngineResult<Self> {
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        sink.start(queue.clone())?;
        Ok(Self {
            timeline: Mutex::new(GaplessTimeline::new(PLAYBACK_SAMPLE_RATE)),
            queue,
            clock,
            sink: Mutex::new(sink),
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Start with the production cpal sink and a system clock.
    pub fn with_output_device() -> EngineResult<Self> {
        Self::start(Box::new(CpalSink::default()), Arc::new(SystemClock::new()))
    }

    /// Enqueue one decoded chunk of mono samples for gapless playback.
    ///
    /// Zero-length chunks are dropped. Chunks play strictly in arrival
    /// order.
    pub fn enqueue(&self, samples: Vec<f32>) -> Option<ScheduledSpan> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return None;
        }
        let span = self
            .timeline
            .lock()
            .schedule(samples.len(), self.clock.now())?;
        self.queue.lock().extend(samples);
        Some(span)
    }

    /// True while enqueued audio has not finished rendering.
    pub fn is_speaking(&self) -> bool {
        self.timeline.lock().is_draining(self.clock.now())
    }

    /// Drop everything scheduled and silence the output immediately.
    /// Queue and timeline are cleared under their locks, so no completion
    /// path observes a half-cleared state.
    pub fn clear(&self) {
        self.timeline.lock().reset();
        self.queue.lock().clear();
    }

    /// Stop the sink and clear all pending audio. Idempotent; safe from an
    /// error handler.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.clear();
        self.sink.lock().stop();
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

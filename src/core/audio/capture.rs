//! Microphone capture.
//!
//! Captures mono audio at 16kHz in fixed 512-sample blocks and forwards each
//! block out of the device callback over an unbounded channel. The
//! `cpal::Stream` is `!Send`, so it lives on a dedicated thread that parks
//! until `stop()`.
//!
//! Losing the device mid-call (the user revoking microphone permission)
//! surfaces as [`CaptureEvent::Failed`] so the session can transition to its
//! error state.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;

use crate::config::{CAPTURE_BLOCK_SIZE, CAPTURE_SAMPLE_RATE};
use crate::errors::{EngineError, EngineResult};

/// One fixed-size block of captured samples, f32 in [-1, 1].
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Event emitted by a capture source.
#[derive(Debug)]
pub enum CaptureEvent {
    /// One captured block, in capture order.
    Frame(AudioFrame),
    /// The device failed or was revoked; the session must error out.
    Failed(String),
}

/// Capture seam. Production uses [`MicCapture`]; tests drive the engine with
/// scripted sources.
pub trait CaptureSource: Send {
    /// Acquire the device and start forwarding [`CaptureEvent`]s.
    ///
    /// Fails with [`EngineError::Device`] if no input device is available,
    /// leaving no partial resources allocated.
    fn start(&mut self, events: mpsc::UnboundedSender<CaptureEvent>) -> EngineResult<()>;

    /// Release the device. Idempotent.
    fn stop(&mut self);
}

/// Default-input-device capture via cpal.
#[derive(Default)]
pub struct MicCapture {
    handle: Option<CaptureHandle>,
}

struct CaptureHandle {
    stop_tx: std::sync::mpsc::Sender<()>,
    join: std::thread::JoinHandle<()>,
}

impl CaptureSource for MicCapture {
    fn start(&mut self, events: mpsc::UnboundedSender<CaptureEvent>) -> EngineResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<EngineResult<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name("homevoice-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(events) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| EngineError::Runtime(format!("capture thread spawn failed: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| EngineError::Device("capture thread exited during setup".to_string()))??;

        self.handle = Some(CaptureHandle { stop_tx, join });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop_tx.send(());
            if handle.join.join().is_err() {
                tracing::warn!("Capture thread panicked during shutdown");
            }
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    events: mpsc::UnboundedSender<CaptureEvent>,
) -> EngineResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| {
            EngineError::Device("No microphone available or permission denied".to_string())
        })?;

    tracing::info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(CAPTURE_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Fixed(CAPTURE_BLOCK_SIZE as u32),
    };

    let frame_tx = events.clone();
    let mut block: Vec<f32> = Vec::with_capacity(CAPTURE_BLOCK_SIZE);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                block.push(sample);
                if block.len() >= CAPTURE_BLOCK_SIZE {
                    let frame = AudioFrame {
                        samples: std::mem::replace(
                            &mut block,
                            Vec::with_capacity(CAPTURE_BLOCK_SIZE),
                        ),
                        sample_rate: CAPTURE_SAMPLE_RATE,
                    };
                    // Receiver gone means the session is tearing down.
                    let _ = frame_tx.send(CaptureEvent::Frame(frame));
                }
            }
        },
        move |err| {
            tracing::warn!("Input stream error: {}", err);
            let _ = events.send(CaptureEvent::Failed(err.to_string()));
        },
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

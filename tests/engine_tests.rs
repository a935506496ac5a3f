//! End-to-end session lifecycle tests with mocked transport, capture, and
//! playback. The context provider is a real HTTP server (wiremock); the
//! playback timeline runs on a fake clock so speaking state is
//! deterministic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_test::assert_ok;
use tokio::sync::mpsc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use homevoice_engine::config::EngineConfig;
use homevoice_engine::core::audio::{
    AudioFrame, AudioSink, CaptureEvent, CaptureSource, FakeClock, NullSink, OutputClock,
};
use homevoice_engine::core::session::{SessionState, VoiceSessionEngine};
use homevoice_engine::core::transport::{
    AudioCallback, BoxedTransport, EventCallback, SessionContext, TransportEvent,
    TransportSession,
};
use homevoice_engine::errors::{EngineError, EngineResult};

// =============================================================================
// Mock transport
// =============================================================================

/// Shared view into one mock transport: the test injects events and audio
/// through the callbacks the engine registered.
#[derive(Clone, Default)]
struct TransportHandle {
    opened: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    sent_frames: Arc<Mutex<Vec<usize>>>,
    audio_cb: Arc<Mutex<Option<AudioCallback>>>,
    event_cb: Arc<Mutex<Option<EventCallback>>>,
}

impl TransportHandle {
    async fn emit(&self, event: TransportEvent) {
        let cb = self.event_cb.lock().clone();
        if let Some(cb) = cb {
            cb(event).await;
        }
    }

    async fn emit_audio(&self, samples: Vec<f32>) {
        let cb = self.audio_cb.lock().clone();
        if let Some(cb) = cb {
            cb(samples).await;
        }
    }
}

struct MockTransport {
    handle: TransportHandle,
    fail_open: Option<String>,
}

#[async_trait]
impl TransportSession for MockTransport {
    async fn open(&mut self, _ctx: &SessionContext) -> EngineResult<()> {
        if let Some(message) = &self.fail_open {
            return Err(EngineError::Network(message.clone()));
        }
        self.handle.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_audio(&self, frame: &AudioFrame) {
        if self.handle.opened.load(Ordering::SeqCst) {
            self.handle.sent_frames.lock().push(frame.samples.len());
        }
    }

    fn on_audio(&mut self, callback: AudioCallback) {
        *self.handle.audio_cb.lock() = Some(callback);
    }

    fn on_event(&mut self, callback: EventCallback) {
        *self.handle.event_cb.lock() = Some(callback);
    }

    fn is_open(&self) -> bool {
        self.handle.opened.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.handle.opened.store(false, Ordering::SeqCst);
        self.handle.closed.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Scripted capture
// =============================================================================

#[derive(Clone, Default)]
struct CaptureHandle {
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<CaptureEvent>>>>,
}

impl CaptureHandle {
    fn send_frame(&self, samples: usize) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(CaptureEvent::Frame(AudioFrame {
                samples: vec![0.0; samples],
                sample_rate: 16_000,
            }));
        }
    }

    fn fail(&self, message: &str) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(CaptureEvent::Failed(message.to_string()));
        }
    }
}

struct ScriptedCapture {
    handle: CaptureHandle,
    deny: bool,
}

impl CaptureSource for ScriptedCapture {
    fn start(&mut self, events: mpsc::UnboundedSender<CaptureEvent>) -> EngineResult<()> {
        if self.deny {
            return Err(EngineError::Device(
                "No microphone available or permission denied".to_string(),
            ));
        }
        self.handle.started.store(true, Ordering::SeqCst);
        *self.handle.events.lock() = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        self.handle.stopped.store(true, Ordering::SeqCst);
        *self.handle.events.lock() = None;
    }
}

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    engine: Arc<VoiceSessionEngine>,
    transports: Arc<Mutex<Vec<TransportHandle>>>,
    captures: Arc<Mutex<Vec<CaptureHandle>>>,
    clock: Arc<FakeClock>,
    _server: MockServer,
}

impl Fixture {
    fn transport(&self, index: usize) -> TransportHandle {
        self.transports.lock()[index].clone()
    }

    fn capture(&self, index: usize) -> CaptureHandle {
        self.captures.lock()[index].clone()
    }
}

async fn fixture() -> Fixture {
    fixture_with(false, None).await
}

async fn fixture_with(deny_mic: bool, fail_open: Option<&str>) -> Fixture {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "systemPrompt": "Talk about the home."
        })))
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.context_endpoint = server.uri();

    let transports: Arc<Mutex<Vec<TransportHandle>>> = Arc::new(Mutex::new(Vec::new()));
    let captures: Arc<Mutex<Vec<CaptureHandle>>> = Arc::new(Mutex::new(Vec::new()));
    let clock = Arc::new(FakeClock::new());

    let transport_slots = transports.clone();
    let fail_open = fail_open.map(str::to_string);
    let capture_slots = captures.clone();
    let playback_clock = clock.clone();

    let engine = VoiceSessionEngine::with_parts(
        config,
        Box::new(move |_cfg: &EngineConfig| {
            let handle = TransportHandle::default();
            transport_slots.lock().push(handle.clone());
            Box::new(MockTransport {
                handle,
                fail_open: fail_open.clone(),
            }) as BoxedTransport
        }),
        Box::new(move || {
            let handle = CaptureHandle::default();
            capture_slots.lock().push(handle.clone());
            Box::new(ScriptedCapture {
                handle,
                deny: deny_mic,
            }) as Box<dyn CaptureSource>
        }),
        Box::new(move || {
            (
                Box::new(NullSink) as Box<dyn AudioSink>,
                playback_clock.clone() as Arc<dyn OutputClock>,
            )
        }),
    );

    Fixture {
        engine: Arc::new(engine),
        transports,
        captures,
        clock,
        _server: server,
    }
}

/// Give the pump task time to drain its channels and run a drain tick.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_start_reaches_connected() {
    let fx = fixture().await;
    tokio_test::assert_ok!(fx.engine.start_session("prop-1").await);

    assert_eq!(fx.engine.state(), SessionState::Connected);
    assert!(fx.engine.is_connected());
    assert!(fx.engine.is_call_active());
    assert!(!fx.engine.is_listening());
    assert!(!fx.engine.is_speaking());
    assert!(fx.engine.error_message().is_none());
    assert!(fx.transport(0).opened.load(Ordering::SeqCst));
    assert!(fx.capture(0).started.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_mic_denied_lands_in_error() {
    let fx = fixture_with(true, None).await;
    let result = fx.engine.start_session("prop-1").await;

    assert!(matches!(result, Err(EngineError::Device(_))));
    assert_eq!(fx.engine.state(), SessionState::Error);
    assert!(!fx.engine.is_connected());
    let message = fx.engine.error_message().unwrap();
    assert!(message.contains("microphone") || message.contains("Audio device"));
    // The handshake must never have been attempted.
    assert!(!fx.transport(0).opened.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_failed_handshake_releases_capture() {
    let fx = fixture_with(false, Some("connection refused")).await;
    let result = fx.engine.start_session("prop-1").await;

    assert!(matches!(result, Err(EngineError::Network(_))));
    assert_eq!(fx.engine.state(), SessionState::Error);
    // Mic acquired during startup must be released on the error path.
    assert!(fx.capture(0).stopped.load(Ordering::SeqCst));
    assert!(fx.engine.error_message().unwrap().contains("Network"));
}

#[tokio::test]
async fn test_retry_after_error_clears_message() {
    let fx = fixture_with(false, Some("connection refused")).await;
    assert!(fx.engine.start_session("prop-1").await.is_err());
    assert_eq!(fx.engine.state(), SessionState::Error);

    // Stop from the error state clears back to idle.
    fx.engine.stop_session().await;
    assert_eq!(fx.engine.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_stop_releases_everything() {
    let fx = fixture().await;
    fx.engine.start_session("prop-1").await.unwrap();
    fx.engine.stop_session().await;

    assert_eq!(fx.engine.state(), SessionState::Idle);
    assert!(fx.transport(0).closed.load(Ordering::SeqCst));
    assert!(fx.capture(0).stopped.load(Ordering::SeqCst));

    // Idempotent.
    fx.engine.stop_session().await;
    assert_eq!(fx.engine.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_stop_racing_start_leaves_nothing_behind() {
    let fx = fixture().await;
    let engine = fx.engine.clone();
    let start = tokio::spawn(async move {
        let _ = engine.start_session("prop-1").await;
    });
    // Hang up immediately, possibly while the start is still in flight.
    fx.engine.stop_session().await;
    start.await.unwrap();

    // Whichever order the two settled in, a final stop leaves idle with the
    // mic released.
    fx.engine.stop_session().await;
    assert_eq!(fx.engine.state(), SessionState::Idle);
    for capture in fx.captures.lock().iter() {
        assert!(
            !capture.started.load(Ordering::SeqCst)
                || capture.stopped.load(Ordering::SeqCst),
            "acquired mic must be released"
        );
    }
}

#[tokio::test]
async fn test_restart_stops_previous_session() {
    let fx = fixture().await;
    fx.engine.start_session("prop-1").await.unwrap();
    fx.engine.start_session("prop-2").await.unwrap();

    assert_eq!(fx.engine.state(), SessionState::Connected);
    assert_eq!(fx.transports.lock().len(), 2);
    // Exactly one live session: the first is fully torn down.
    assert!(fx.transport(0).closed.load(Ordering::SeqCst));
    assert!(fx.capture(0).stopped.load(Ordering::SeqCst));
    assert!(fx.transport(1).opened.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_concurrent_starts_settle_to_one_session() {
    let fx = fixture().await;

    // Two starts in flight at once; the engine serializes them, and the
    // later one supersedes whatever the earlier one established.
    let first = {
        let engine = fx.engine.clone();
        tokio::spawn(async move { engine.start_session("prop-1").await })
    };
    let second = {
        let engine = fx.engine.clone();
        tokio::spawn(async move { engine.start_session("prop-1").await })
    };
    tokio_test::assert_ok!(first.await.unwrap());
    tokio_test::assert_ok!(second.await.unwrap());

    assert_eq!(fx.engine.state(), SessionState::Connected);

    // Exactly one transport remains open; every superseded one is closed.
    let transports = fx.transports.lock().clone();
    assert_eq!(transports.len(), 2);
    assert_eq!(
        transports
            .iter()
            .filter(|t| t.opened.load(Ordering::SeqCst))
            .count(),
        1,
        "exactly one live transport"
    );
    for superseded in transports.iter().filter(|t| !t.opened.load(Ordering::SeqCst)) {
        assert!(superseded.closed.load(Ordering::SeqCst));
    }

    // And exactly one mic acquisition is still live.
    let captures = fx.captures.lock().clone();
    assert_eq!(
        captures
            .iter()
            .filter(|c| {
                c.started.load(Ordering::SeqCst) && !c.stopped.load(Ordering::SeqCst)
            })
            .count(),
        1,
        "exactly one live capture"
    );
}

#[tokio::test]
async fn test_speech_events_toggle_listening() {
    let fx = fixture().await;
    fx.engine.start_session("prop-1").await.unwrap();
    let transport = fx.transport(0);

    transport.emit(TransportEvent::SpeechStarted).await;
    settle().await;
    assert!(fx.engine.is_listening());
    assert!(!fx.engine.is_speaking());

    transport.emit(TransportEvent::SpeechStopped).await;
    settle().await;
    assert!(!fx.engine.is_listening());
    assert!(fx.engine.is_connected());
}

#[tokio::test]
async fn test_inbound_audio_speaks_until_drained() {
    let fx = fixture().await;
    fx.engine.start_session("prop-1").await.unwrap();
    let transport = fx.transport(0);

    // 2400 samples = 100ms at the 24kHz playback rate.
    transport.emit_audio(vec![0.0; 2_400]).await;
    settle().await;
    assert!(fx.engine.is_speaking());

    fx.clock.advance(Duration::from_millis(150));
    settle().await;
    assert!(!fx.engine.is_speaking());
    assert_eq!(fx.engine.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_barge_in_cancels_speaking() {
    let fx = fixture().await;
    fx.engine.start_session("prop-1").await.unwrap();
    let transport = fx.transport(0);

    // Long reply in flight.
    transport.emit_audio(vec![0.0; 48_000]).await;
    settle().await;
    assert!(fx.engine.is_speaking());

    // User interrupts: playback is cancelled immediately.
    transport.emit(TransportEvent::SpeechStarted).await;
    settle().await;
    assert!(fx.engine.is_listening());
    assert!(!fx.engine.is_speaking());
}

#[tokio::test]
async fn test_capture_frames_reach_transport() {
    let fx = fixture().await;
    fx.engine.start_session("prop-1").await.unwrap();

    let capture = fx.capture(0);
    capture.send_frame(512);
    capture.send_frame(512);
    settle().await;

    let sent = fx.transport(0).sent_frames.lock().clone();
    assert_eq!(sent, vec![512, 512]);
}

#[tokio::test]
async fn test_capture_failure_mid_call_errors_out() {
    let fx = fixture().await;
    fx.engine.start_session("prop-1").await.unwrap();

    fx.capture(0).fail("device disconnected");
    settle().await;

    assert_eq!(fx.engine.state(), SessionState::Error);
    assert!(fx
        .engine
        .error_message()
        .unwrap()
        .contains("device disconnected"));
    assert!(fx.transport(0).closed.load(Ordering::SeqCst));
    assert!(fx.capture(0).stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_normal_remote_close_returns_to_idle() {
    let fx = fixture().await;
    fx.engine.start_session("prop-1").await.unwrap();

    fx.transport(0).emit(TransportEvent::Closed { normal: true }).await;
    settle().await;

    assert_eq!(fx.engine.state(), SessionState::Idle);
    assert!(fx.engine.error_message().is_none());
    assert!(fx.capture(0).stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_abnormal_close_is_reported() {
    let fx = fixture().await;
    fx.engine.start_session("prop-1").await.unwrap();

    fx.transport(0)
        .emit(TransportEvent::Failed(EngineError::Network(
            "abnormal close (code 1006)".to_string(),
        )))
        .await;
    settle().await;

    assert_eq!(fx.engine.state(), SessionState::Error);
    assert!(fx.engine.error_message().unwrap().contains("1006"));
    assert!(!fx.engine.is_call_active());
}

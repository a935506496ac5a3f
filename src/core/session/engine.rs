//! Session engine: wires capture, transport, and playback together under the
//! state machine.
//!
//! One session at a time. `start_session` runs the whole startup chain
//! (context fetch, device acquisition, channel handshake) and either lands in
//! `Connected` or releases every partial resource and lands in `Error`.
//! `stop_session` is idempotent and safe from any state. A dedicated pump
//! task owns all event dispatch, so protocol events, capture frames, and
//! playback-drain checks are applied strictly in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::audio::{
    AudioSink, CaptureEvent, CaptureSource, CpalSink, MicCapture, OutputClock, PlaybackScheduler,
    SystemClock,
};
use crate::core::context::ContextClient;
use crate::core::session::SessionState;
use crate::core::transport::{create_transport, BoxedTransport, TransportEvent};
use crate::errors::EngineResult;

/// Interval at which the pump checks whether scheduled playback has drained.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

// =============================================================================
// Factories
// =============================================================================

/// Builds the transport variant for a new session.
pub type TransportFactory = Box<dyn Fn(&EngineConfig) -> BoxedTransport + Send + Sync>;

/// Builds the capture source for a new session.
pub type CaptureFactory = Box<dyn Fn() -> Box<dyn CaptureSource> + Send + Sync>;

/// Builds the output sink and the clock the playback timeline runs on.
pub type PlaybackFactory = Box<dyn Fn() -> (Box<dyn AudioSink>, Arc<dyn OutputClock>) + Send + Sync>;

// =============================================================================
// Session Resources
// =============================================================================

/// Everything a live session owns. Shared with the pump task so that either
/// the engine or the pump (on a terminal protocol event) can tear it down;
/// `live` makes teardown run exactly once.
struct SessionResources {
    transport: tokio::sync::Mutex<BoxedTransport>,
    capture: parking_lot::Mutex<Box<dyn CaptureSource>>,
    scheduler: PlaybackScheduler,
    live: AtomicBool,
}

impl SessionResources {
    /// Release transport, capture, and playback, in that order. Idempotent;
    /// never fails.
    async fn teardown(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        self.transport.lock().await.close().await;
        self.capture.lock().stop();
        self.scheduler.close();
    }
}

struct ActiveSession {
    id: Uuid,
    started_at: Instant,
    resources: Arc<SessionResources>,
    pump: JoinHandle<()>,
}

// =============================================================================
// Voice Session Engine
// =============================================================================

/// Top-level engine the UI talks to.
pub struct VoiceSessionEngine {
    config: EngineConfig,
    context: ContextClient,
    state: Arc<RwLock<SessionState>>,
    last_error: Arc<RwLock<Option<String>>>,
    current: tokio::sync::Mutex<Option<ActiveSession>>,
    transport_factory: TransportFactory,
    capture_factory: CaptureFactory,
    playback_factory: PlaybackFactory,
}

impl VoiceSessionEngine {
    /// Engine with production devices: microphone capture, speaker playback,
    /// and the transport selected by the config.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_parts(
            config,
            Box::new(|cfg: &EngineConfig| create_transport(cfg.transport, cfg)),
            Box::new(|| Box::new(MicCapture::default()) as Box<dyn CaptureSource>),
            Box::new(|| {
                (
                    Box::new(CpalSink::default()) as Box<dyn AudioSink>,
                    Arc::new(SystemClock::new()) as Arc<dyn OutputClock>,
                )
            }),
        )
    }

    /// Engine with injected transport, capture, and playback parts.
    pub fn with_parts(
        config: EngineConfig,
        transport_factory: TransportFactory,
        capture_factory: CaptureFactory,
        playback_factory: PlaybackFactory,
    ) -> Self {
        let context = ContextClient::new(&config.context_endpoint);
        Self {
            config,
            context,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            last_error: Arc::new(RwLock::new(None)),
            current: tokio::sync::Mutex::new(None),
            transport_factory,
            capture_factory,
            playback_factory,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a session about `property_id`.
    ///
    /// Any session already active is stopped first, so concurrent or repeated
    /// starts always leave exactly one live session. On failure every partial
    /// resource is released and the engine lands in [`SessionState::Error`]
    /// with a user-facing message; a later start is allowed from there.
    pub async fn start_session(&self, property_id: &str) -> EngineResult<()> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            tracing::info!(session = %previous.id, "Stopping previous session before restart");
            self.close_session(previous).await;
        }

        self.set_state(SessionState::Connecting);
        match self.open_session(property_id, &mut current).await {
            Ok(session_id) => {
                *self.last_error.write() = None;
                self.set_state(SessionState::Connected);
                tracing::info!(session = %session_id, property = property_id, "Session started");
                Ok(())
            }
            Err(e) => {
                if let Some(partial) = current.take() {
                    partial.resources.teardown().await;
                    partial.pump.abort();
                }
                *self.last_error.write() = Some(e.user_message());
                self.set_state(SessionState::Error);
                tracing::warn!(property = property_id, "Session start failed: {}", e);
                Err(e)
            }
        }
    }

    /// Stop the active session, releasing transport, capture, and playback.
    /// Safe to call from any state, including while a start is in flight
    /// (runs after it settles) and when nothing is active.
    pub async fn stop_session(&self) {
        let mut current = self.current.lock().await;
        match current.take() {
            Some(session) => self.close_session(session).await,
            None => {
                // Nothing live, but an error state still clears to idle.
                if *self.state.read() != SessionState::Idle {
                    self.set_state(SessionState::Closing);
                    self.set_state(SessionState::Idle);
                }
            }
        }
    }

    async fn open_session(
        &self,
        property_id: &str,
        current: &mut Option<ActiveSession>,
    ) -> EngineResult<Uuid> {
        let ctx = self.context.fetch(property_id).await?;

        let (sink, clock) = (self.playback_factory)();
        let scheduler = PlaybackScheduler::start(sink, clock)?;

        let mut transport = (self.transport_factory)(&self.config);
        let (pump_tx, pump_rx) = mpsc::unbounded_channel::<PumpEvent>();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel::<CaptureEvent>();

        let audio_tx = pump_tx.clone();
        transport.on_audio(Arc::new(move |samples| {
            let _ = audio_tx.send(PumpEvent::Audio(samples));
            Box::pin(async {})
        }));
        let event_tx = pump_tx.clone();
        transport.on_event(Arc::new(move |event| {
            let _ = event_tx.send(PumpEvent::Transport(event));
            Box::pin(async {})
        }));

        // Microphone before network: a denied device must fail fast, before
        // any handshake.
        let mut capture = (self.capture_factory)();
        capture.start(capture_tx)?;

        let resources = Arc::new(SessionResources {
            transport: tokio::sync::Mutex::new(transport),
            capture: parking_lot::Mutex::new(capture),
            scheduler,
            live: AtomicBool::new(true),
        });

        let session_id = Uuid::new_v4();
        let pump = tokio::spawn(run_pump(
            resources.clone(),
            self.state.clone(),
            self.last_error.clone(),
            pump_rx,
            capture_rx,
        ));

        // Registered before the handshake so a failure mid-open is torn down
        // by the caller.
        *current = Some(ActiveSession {
            id: session_id,
            started_at: Instant::now(),
            resources: resources.clone(),
            pump,
        });

        resources.transport.lock().await.open(&ctx).await?;
        Ok(session_id)
    }

    async fn close_session(&self, session: ActiveSession) {
        self.set_state(SessionState::Closing);
        session.resources.teardown().await;
        session.pump.abort();
        tracing::info!(
            session = %session.id,
            elapsed = ?session.started_at.elapsed(),
            "Session closed"
        );
        self.set_state(SessionState::Idle);
    }

    fn set_state(&self, next: SessionState) {
        apply_state(&self.state, next);
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// User-facing message from the most recent failure. Cleared by the next
    /// successful start.
    pub fn error_message(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_listening(&self) -> bool {
        self.state().is_listening()
    }

    pub fn is_speaking(&self) -> bool {
        self.state().is_speaking()
    }

    pub fn is_call_active(&self) -> bool {
        self.state().is_call_active()
    }
}

// =============================================================================
// Event Pump
// =============================================================================

enum PumpEvent {
    /// Decoded inbound audio from the transport.
    Audio(Vec<f32>),
    Transport(TransportEvent),
}

fn apply_state(cell: &Arc<RwLock<SessionState>>, next: SessionState) {
    let mut state = cell.write();
    if *state == next {
        return;
    }
    if state.can_transition_to(next) {
        tracing::debug!(from = %*state, to = %next, "Session state change");
        *state = next;
    } else {
        tracing::warn!(from = %*state, to = %next, "Ignoring invalid state transition");
    }
}

/// Single consumer for everything that can move the session: transport
/// events, capture frames, and the playback-drain poll. Exits when the
/// session reaches a terminal state or both channels close.
async fn run_pump(
    resources: Arc<SessionResources>,
    state: Arc<RwLock<SessionState>>,
    last_error: Arc<RwLock<Option<String>>>,
    mut pump_rx: mpsc::UnboundedReceiver<PumpEvent>,
    mut capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
) {
    let mut drain = tokio::time::interval(DRAIN_POLL_INTERVAL);
    drain.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = pump_rx.recv() => match event {
                Some(PumpEvent::Audio(samples)) => {
                    if resources.scheduler.enqueue(samples).is_some() {
                        apply_state(&state, SessionState::Speaking);
                    }
                }
                Some(PumpEvent::Transport(event)) => {
                    if dispatch_transport_event(event, &resources, &state, &last_error).await {
                        break;
                    }
                }
                None => break,
            },
            event = capture_rx.recv() => match event {
                Some(CaptureEvent::Frame(frame)) => {
                    resources.transport.lock().await.send_audio(&frame);
                }
                Some(CaptureEvent::Failed(message)) => {
                    fail_session(
                        &resources,
                        &state,
                        &last_error,
                        format!("Microphone failed: {}", message),
                    )
                    .await;
                    break;
                }
                None => break,
            },
            _ = drain.tick() => {
                // Speaking holds only while scheduled audio is still
                // rendering on the output clock.
                if *state.read() == SessionState::Speaking && !resources.scheduler.is_speaking() {
                    apply_state(&state, SessionState::Connected);
                }
            }
        }
    }
}

/// Returns true when the event ends the session and the pump should exit.
async fn dispatch_transport_event(
    event: TransportEvent,
    resources: &Arc<SessionResources>,
    state: &Arc<RwLock<SessionState>>,
    last_error: &Arc<RwLock<Option<String>>>,
) -> bool {
    match event {
        TransportEvent::Opened => {
            tracing::debug!("Transport channel established");
            false
        }
        TransportEvent::SpeechStarted => {
            // User barge-in cancels whatever the model was saying.
            resources.scheduler.clear();
            apply_state(state, SessionState::Listening);
            false
        }
        TransportEvent::SpeechStopped => {
            if *state.read() == SessionState::Listening {
                apply_state(state, SessionState::Connected);
            }
            false
        }
        TransportEvent::TurnComplete => {
            if !resources.scheduler.is_speaking() {
                apply_state(state, SessionState::Connected);
            }
            false
        }
        TransportEvent::Closed { normal: true } => {
            tracing::info!("Remote ended the session");
            resources.teardown().await;
            apply_state(state, SessionState::Closing);
            apply_state(state, SessionState::Idle);
            true
        }
        TransportEvent::Closed { normal: false } => {
            fail_session(
                resources,
                state,
                last_error,
                "Connection closed unexpectedly. Please try again.".to_string(),
            )
            .await;
            true
        }
        TransportEvent::Failed(e) => {
            fail_session(resources, state, last_error, e.user_message()).await;
            true
        }
    }
}

async fn fail_session(
    resources: &Arc<SessionResources>,
    state: &Arc<RwLock<SessionState>>,
    last_error: &Arc<RwLock<Option<String>>>,
    message: String,
) {
    tracing::warn!("Session failed: {}", message);
    *last_error.write() = Some(message);
    resources.teardown().await;
    apply_state(state, SessionState::Error);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_without_devices() -> VoiceSessionEngine {
        VoiceSessionEngine::with_parts(
            EngineConfig::default(),
            Box::new(|cfg: &EngineConfig| create_transport(cfg.transport, cfg)),
            Box::new(|| Box::new(MicCapture::default()) as Box<dyn CaptureSource>),
            Box::new(|| {
                (
                    Box::new(crate::core::audio::NullSink) as Box<dyn AudioSink>,
                    Arc::new(SystemClock::new()) as Arc<dyn OutputClock>,
                )
            }),
        )
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let engine = engine_without_devices();
        assert_eq!(engine.state(), SessionState::Idle);
        assert!(!engine.is_connected());
        assert!(!engine.is_listening());
        assert!(!engine.is_speaking());
        assert!(engine.error_message().is_none());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let engine = engine_without_devices();
        engine.stop_session().await;
        engine.stop_session().await;
        assert_eq!(engine.state(), SessionState::Idle);
    }
}

//! WebSocket transport session.
//!
//! Opens a single persistent socket to the provider, authenticated by an API
//! key in the connection URL. On open it sends one `setup` envelope naming
//! the model and requesting audio output, then one initial turn carrying the
//! conversation instructions. Every captured frame goes out as a base64
//! PCM16 media chunk; inbound messages are probed for model-turn audio and
//! turn-complete signals.
//!
//! There is no automatic reconnection: conversations are user-initiated and
//! short-lived, so a lost socket surfaces once as a terminal failure and the
//! caller starts a new session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::messages::{ClientMessage, ServerMessage};
use crate::config::EngineConfig;
use crate::core::audio::{pcm, AudioFrame};
use crate::core::transport::base::{
    AudioCallback, EventCallback, SessionContext, TransportEvent, TransportSession,
};
use crate::errors::{EngineError, EngineResult};

/// Capacity of the outbound message channel. Roughly eight seconds of
/// capture at the 32ms block cadence; a full channel means the socket has
/// stalled and frames are dropped rather than queued.
const OUTBOUND_CAPACITY: usize = 256;

/// Map a WebSocket close code to an error. A normal close (1000) is an
/// intentional teardown and is not reported.
pub fn classify_close(code: u16) -> Option<EngineError> {
    if code == 1000 {
        None
    } else {
        Some(EngineError::Network(format!(
            "Connection closed abnormally (code {})",
            code
        )))
    }
}

/// JSON-framed WebSocket session.
pub struct WebSocketSession {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    default_voice: Option<String>,

    open: Arc<AtomicBool>,
    intentional_close: Arc<AtomicBool>,
    outbound: Arc<parking_lot::Mutex<Option<mpsc::Sender<ClientMessage>>>>,
    audio_callback: Option<AudioCallback>,
    event_callback: Option<EventCallback>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketSession {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            endpoint: config.ws_endpoint.clone(),
            api_key: config.ws_api_key.clone(),
            model: config.ws_model.clone(),
            default_voice: config.voice.clone(),
            open: Arc::new(AtomicBool::new(false)),
            intentional_close: Arc::new(AtomicBool::new(false)),
            outbound: Arc::new(parking_lot::Mutex::new(None)),
            audio_callback: None,
            event_callback: None,
            task: None,
        }
    }

    /// Build the connection URL with the API key as a query parameter.
    fn build_url(&self, api_key: &str) -> EngineResult<url::Url> {
        let mut url = url::Url::parse(&self.endpoint)
            .map_err(|e| EngineError::Network(format!("Invalid endpoint: {}", e)))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }

    async fn dispatch_server_message(
        text: &str,
        audio_cb: &Option<AudioCallback>,
        event_cb: &Option<EventCallback>,
    ) {
        let msg: ServerMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Failed to parse server message: {}", e);
                return;
            }
        };

        if msg.setup_complete.is_some() {
            tracing::debug!("Provider acknowledged setup");
            if let Some(cb) = event_cb {
                cb(TransportEvent::Opened).await;
            }
        }

        if msg.is_interrupted() {
            // The model interrupting itself means the user began talking.
            if let Some(cb) = event_cb {
                cb(TransportEvent::SpeechStarted).await;
            }
        }

        for payload in msg.audio_payloads() {
            match pcm::decode_base64(payload) {
                Ok(bytes) => {
                    if let Some(cb) = audio_cb {
                        cb(pcm::pcm16_to_f32(&bytes)).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to decode inbound audio chunk: {}", e);
                }
            }
        }

        if msg.is_turn_complete() {
            if let Some(cb) = event_cb {
                cb(TransportEvent::TurnComplete).await;
            }
        }
    }
}

#[async_trait]
impl TransportSession for WebSocketSession {
    async fn open(&mut self, ctx: &SessionContext) -> EngineResult<()> {
        if self.open.load(Ordering::SeqCst) {
            return Ok(());
        }

        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| EngineError::Auth("No API key configured".to_string()))?;
        let url = self.build_url(&api_key)?;

        self.intentional_close.store(false, Ordering::SeqCst);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| EngineError::Network(format!("WebSocket connect failed: {}", e)))?;

        tracing::info!("WebSocket session established for property {}", ctx.property_id);

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        // Setup and the instructions turn go out before any audio.
        let voice = ctx.voice.as_deref().or(self.default_voice.as_deref());
        for msg in [
            ClientMessage::setup(&self.model, voice),
            ClientMessage::initial_turn(&ctx.instructions),
        ] {
            let json = serde_json::to_string(&msg)
                .map_err(|e| EngineError::Protocol(format!("Serialization failed: {}", e)))?;
            ws_sink
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| EngineError::Network(format!("Handshake send failed: {}", e)))?;
        }

        let (tx, mut rx) = mpsc::channel::<ClientMessage>(OUTBOUND_CAPACITY);
        *self.outbound.lock() = Some(tx);

        let audio_cb = self.audio_callback.clone();
        let event_cb = self.event_callback.clone();
        let open = self.open.clone();
        let intentional = self.intentional_close.clone();
        let outbound = self.outbound.clone();

        self.open.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = rx.recv() => {
                        let json = match serde_json::to_string(&msg) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize outbound message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            if !intentional.load(Ordering::SeqCst) {
                                tracing::error!("WebSocket send failed: {}", e);
                                if let Some(cb) = &event_cb {
                                    cb(TransportEvent::Failed(EngineError::Network(
                                        format!("Send failed: {}", e),
                                    )))
                                    .await;
                                }
                            }
                            break;
                        }
                    }

                    Some(msg) = ws_stream.next() => {
                        match msg {
                            Ok(Message::Text(text)) => {
                                Self::dispatch_server_message(&text, &audio_cb, &event_cb).await;
                            }
                            Ok(Message::Binary(data)) => {
                                // Some deployments deliver JSON inside binary frames.
                                match std::str::from_utf8(&data) {
                                    Ok(text) => {
                                        Self::dispatch_server_message(text, &audio_cb, &event_cb)
                                            .await;
                                    }
                                    Err(_) => {
                                        tracing::warn!("Ignoring non-UTF8 binary frame");
                                    }
                                }
                            }
                            Ok(Message::Close(frame)) => {
                                let code: u16 = frame
                                    .map(|f| f.code.into())
                                    .unwrap_or_else(|| CloseCode::Normal.into());
                                tracing::info!("WebSocket closed by server (code {})", code);
                                if let Some(cb) = &event_cb {
                                    match classify_close(code) {
                                        Some(err) => cb(TransportEvent::Failed(err)).await,
                                        None => cb(TransportEvent::Closed { normal: true }).await,
                                    }
                                }
                                break;
                            }
                            Ok(Message::Ping(data)) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::warn!("Failed to send pong: {}", e);
                                }
                            }
                            Err(e) => {
                                if !intentional.load(Ordering::SeqCst) {
                                    tracing::error!("WebSocket error: {}", e);
                                    if let Some(cb) = &event_cb {
                                        cb(TransportEvent::Failed(EngineError::Network(
                                            e.to_string(),
                                        )))
                                        .await;
                                    }
                                }
                                break;
                            }
                            _ => {}
                        }
                    }

                    else => break,
                }
            }

            open.store(false, Ordering::SeqCst);
            *outbound.lock() = None;
            tracing::debug!("WebSocket session task ended");
        });

        self.task = Some(handle);
        Ok(())
    }

    fn send_audio(&self, frame: &AudioFrame) {
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            // Not ready yet; silence during setup is acceptable.
            return;
        };
        let msg = ClientMessage::audio_chunk(&pcm::f32_to_pcm16(&frame.samples));
        if tx.try_send(msg).is_err() {
            // Dropped, never queued: a stalled socket must not build an
            // audio backlog that storms the provider later.
            tracing::trace!("Outbound channel congested, dropping capture frame");
        }
    }

    fn on_audio(&mut self, callback: AudioCallback) {
        self.audio_callback = Some(callback);
    }

    fn on_event(&mut self, callback: EventCallback) {
        self.event_callback = Some(callback);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.intentional_close.store(true, Ordering::SeqCst);
        *self.outbound.lock() = None;
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
        self.open.store(false, Ordering::SeqCst);
        tracing::info!("WebSocket session closed");
    }
}

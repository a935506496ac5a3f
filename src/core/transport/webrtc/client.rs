//! WebRTC transport session.
//!
//! Negotiates a peer connection via an SDP offer/answer exchange through the
//! HTTPS signaling endpoint, authorized with the ephemeral client secret
//! minted by the context provider. Capture audio is bound to a local L16
//! (linear PCM) track, so no base64 framing happens on send; inbound audio
//! arrives on the remote track as L16 RTP payloads in network byte order.
//! Control and turn-taking signals travel over the `oai-events` data channel
//! as JSON.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::events::{ClientEvent, ServerEvent, EVENTS_CHANNEL_LABEL};
use super::signaling::SignalingClient;
use crate::config::{CAPTURE_SAMPLE_RATE, EngineConfig, PLAYBACK_SAMPLE_RATE};
use crate::core::audio::{pcm, AudioFrame};
use crate::core::transport::base::{
    AudioCallback, EventCallback, SessionContext, TransportEvent, TransportSession,
};
use crate::errors::{EngineError, EngineResult};

/// L16 mime type (linear PCM over RTP, RFC 3551).
const MIME_TYPE_L16: &str = "audio/L16";

/// Capacity of the outbound frame channel feeding the track writer. Full
/// channel means the peer connection has stalled; frames are dropped.
const OUTBOUND_CAPACITY: usize = 64;

/// SDP-negotiated WebRTC session.
pub struct WebRtcSession {
    signaling: SignalingClient,
    default_voice: Option<String>,

    open: Arc<AtomicBool>,
    outbound: Arc<parking_lot::Mutex<Option<mpsc::Sender<Bytes>>>>,
    audio_callback: Option<AudioCallback>,
    event_callback: Option<EventCallback>,
    peer: Option<Arc<RTCPeerConnection>>,
    writer_task: Option<JoinHandle<()>>,
}

impl WebRtcSession {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            signaling: SignalingClient::new(&config.signaling_endpoint, &config.webrtc_model),
            default_voice: config.voice.clone(),
            open: Arc::new(AtomicBool::new(false)),
            outbound: Arc::new(parking_lot::Mutex::new(None)),
            audio_callback: None,
            event_callback: None,
            peer: None,
            writer_task: None,
        }
    }

    /// Build a peer connection with L16 registered for both the 16kHz
    /// capture direction and the 24kHz playback direction.
    async fn build_peer_connection(&self) -> EngineResult<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        for (clock_rate, payload_type) in [(CAPTURE_SAMPLE_RATE, 96u8), (PLAYBACK_SAMPLE_RATE, 97u8)]
        {
            media_engine
                .register_codec(
                    RTCRtpCodecParameters {
                        capability: RTCRtpCodecCapability {
                            mime_type: MIME_TYPE_L16.to_owned(),
                            clock_rate,
                            channels: 1,
                            ..Default::default()
                        },
                        payload_type,
                        ..Default::default()
                    },
                    RTPCodecType::Audio,
                )
                .map_err(|e| EngineError::Protocol(format!("Codec registration failed: {}", e)))?;
        }

        let api = APIBuilder::new().with_media_engine(media_engine).build();
        let peer = api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .map_err(|e| EngineError::Network(format!("Peer connection failed: {}", e)))?;
        Ok(Arc::new(peer))
    }

    async fn dispatch_data_channel_message(
        msg: &DataChannelMessage,
        event_cb: &Option<EventCallback>,
    ) {
        let text = match std::str::from_utf8(&msg.data) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!("Ignoring non-UTF8 data channel message");
                return;
            }
        };
        let event: ServerEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Failed to parse data channel event: {}", e);
                return;
            }
        };

        let Some(cb) = event_cb else { return };
        match event {
            ServerEvent::SpeechStarted => cb(TransportEvent::SpeechStarted).await,
            ServerEvent::SpeechStopped => cb(TransportEvent::SpeechStopped).await,
            ServerEvent::ResponseDone => cb(TransportEvent::TurnComplete).await,
            ServerEvent::Error { error } => {
                cb(TransportEvent::Failed(EngineError::Protocol(format!(
                    "{}: {}",
                    error.error_type, error.message
                ))))
                .await;
            }
            ServerEvent::Other => {}
        }
    }
}

#[async_trait]
impl TransportSession for WebRtcSession {
    async fn open(&mut self, ctx: &SessionContext) -> EngineResult<()> {
        if self.open.load(Ordering::SeqCst) {
            return Ok(());
        }

        let client_secret = ctx.client_secret.clone().ok_or_else(|| {
            EngineError::Auth("Context provider returned no client secret".to_string())
        })?;

        let peer = self.build_peer_connection().await?;

        // Local capture track, fed by the writer task below.
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_L16.to_owned(),
                clock_rate: CAPTURE_SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            "homevoice-mic".to_owned(),
        ));
        peer.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EngineError::Network(format!("Failed to add audio track: {}", e)))?;

        // Control/events channel. Instructions are installed once it opens.
        let data_channel = peer
            .create_data_channel(EVENTS_CHANNEL_LABEL, None)
            .await
            .map_err(|e| EngineError::Network(format!("Data channel failed: {}", e)))?;

        let voice = ctx
            .voice
            .clone()
            .or_else(|| self.default_voice.clone());
        let instructions = ctx.instructions.clone();
        let dc_for_open = Arc::clone(&data_channel);
        data_channel.on_open(Box::new(move || {
            let dc = Arc::clone(&dc_for_open);
            let instructions = instructions.clone();
            let voice = voice.clone();
            Box::pin(async move {
                let event = ClientEvent::session_update(&instructions, voice.as_deref());
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if let Err(e) = dc.send_text(json).await {
                            tracing::warn!("Failed to send session update: {}", e);
                        }
                    }
                    Err(e) => tracing::error!("Failed to serialize session update: {}", e),
                }
            })
        }));

        let event_cb = self.event_callback.clone();
        data_channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let event_cb = event_cb.clone();
            Box::pin(async move {
                Self::dispatch_data_channel_message(&msg, &event_cb).await;
            })
        }));

        // Inbound audio: L16 RTP payloads decoded straight into the audio
        // callback.
        let audio_cb = self.audio_callback.clone();
        peer.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let audio_cb = audio_cb.clone();
            Box::pin(async move {
                tracing::debug!("Remote audio track attached");
                while let Ok((packet, _)) = track.read_rtp().await {
                    if packet.payload.is_empty() {
                        continue;
                    }
                    if let Some(cb) = &audio_cb {
                        cb(pcm::pcm16_be_to_f32(&packet.payload)).await;
                    }
                }
                tracing::debug!("Remote audio track ended");
            })
        }));

        let event_cb = self.event_callback.clone();
        let open_flag = self.open.clone();
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let event_cb = event_cb.clone();
            let open_flag = open_flag.clone();
            Box::pin(async move {
                tracing::debug!("Peer connection state: {}", state);
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected
                ) && open_flag.swap(false, Ordering::SeqCst)
                {
                    if let Some(cb) = &event_cb {
                        cb(TransportEvent::Failed(EngineError::Network(format!(
                            "Peer connection {}",
                            state
                        ))))
                        .await;
                    }
                }
            })
        }));

        // SDP offer/answer via the HTTPS signaling endpoint. Candidate
        // gathering completes before the offer is posted, so no trickle ICE
        // is needed.
        let offer = peer
            .create_offer(None)
            .await
            .map_err(|e| EngineError::Protocol(format!("Offer creation failed: {}", e)))?;
        let mut gather_complete = peer.gathering_complete_promise().await;
        peer.set_local_description(offer)
            .await
            .map_err(|e| EngineError::Protocol(format!("Local description failed: {}", e)))?;
        let _ = gather_complete.recv().await;

        let local = peer.local_description().await.ok_or_else(|| {
            EngineError::Protocol("No local description after gathering".to_string())
        })?;

        let answer_sdp = match self.signaling.exchange(&local.sdp, &client_secret).await {
            Ok(answer) => answer,
            Err(e) => {
                // No partial resources may survive a failed open.
                let _ = peer.close().await;
                return Err(e);
            }
        };

        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| EngineError::Protocol(format!("Invalid SDP answer: {}", e)))?;
        if let Err(e) = peer.set_remote_description(answer).await {
            let _ = peer.close().await;
            return Err(EngineError::Protocol(format!(
                "Remote description failed: {}",
                e
            )));
        }

        tracing::info!(
            "WebRTC session negotiated for property {}",
            ctx.property_id
        );

        // Writer task drains capture frames into the local track.
        let (tx, mut rx) = mpsc::channel::<Bytes>(OUTBOUND_CAPACITY);
        *self.outbound.lock() = Some(tx);
        let outbound = self.outbound.clone();
        let writer = tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                let sample_count = data.len() / 2;
                let duration = Duration::from_secs_f64(
                    sample_count as f64 / CAPTURE_SAMPLE_RATE as f64,
                );
                if let Err(e) = track
                    .write_sample(&Sample {
                        data,
                        duration,
                        ..Default::default()
                    })
                    .await
                {
                    tracing::warn!("Track write failed: {}", e);
                    break;
                }
            }
            *outbound.lock() = None;
        });

        self.writer_task = Some(writer);
        self.peer = Some(peer);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_audio(&self, frame: &AudioFrame) {
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        let data = Bytes::from(pcm::f32_to_pcm16_be(&frame.samples));
        if tx.try_send(data).is_err() {
            tracing::trace!("Track writer congested, dropping capture frame");
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
        self.open.store(false, Ordering::SeqCst);
        *self.outbound.lock() = None;
        if let Some(writer) = self.writer_task.take() {
            writer.abort();
        }
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                tracing::warn!("Peer connection close failed: {}", e);
            }
        }
        tracing::info!("WebRTC session closed");
    }
}

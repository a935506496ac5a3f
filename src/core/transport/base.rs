//! Base trait and types for transport sessions.
//!
//! A transport session is a duplex audio+control channel to the remote
//! conversational AI endpoint. Two mutually incompatible protocol variants
//! implement the same contract: an SDP-negotiated WebRTC session and a
//! JSON-framed WebSocket session. The engine and UI depend only on this
//! abstraction; nothing outside the transport layer branches on protocol
//! kind.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::audio::AudioFrame;
use crate::errors::{EngineError, EngineResult};

// =============================================================================
// Transport Kind
// =============================================================================

/// Which protocol variant a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent socket; audio and control as JSON envelopes with base64
    /// PCM payloads.
    #[default]
    #[serde(rename = "websocket")]
    WebSocket,
    /// SDP offer/answer negotiated session; audio as a native media track,
    /// control events over a data channel.
    #[serde(rename = "webrtc")]
    WebRtc,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::WebRtc => write!(f, "webrtc"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "webrtc" => Ok(TransportKind::WebRtc),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

// =============================================================================
// Session Context
// =============================================================================

/// Opaque context descriptor a session is opened with: the conversation
/// instructions plus whatever credential the variant needs.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Identifier of the property the conversation is about.
    pub property_id: String,
    /// System prompt / conversation instructions.
    pub instructions: String,
    /// Ephemeral credential for the WebRTC signaling exchange. The WebSocket
    /// variant supplies its own API key and tolerates its absence.
    pub client_secret: Option<String>,
    /// Voice id requested from the provider.
    pub voice: Option<String>,
}

impl SessionContext {
    /// Generic instruction string used when the context provider returns no
    /// system prompt.
    pub fn fallback_instructions(property_id: &str) -> String {
        format!(
            "You are a friendly voice assistant answering questions about the \
             property with id {}. Keep answers short and conversational.",
            property_id
        )
    }
}

// =============================================================================
// Events & Callbacks
// =============================================================================

/// Protocol-level signals surfaced to the session state machine.
#[derive(Debug)]
pub enum TransportEvent {
    /// The duplex channel is established and ready for audio.
    Opened,
    /// The provider detected the user starting to speak.
    SpeechStarted,
    /// The provider detected the user's utterance ending.
    SpeechStopped,
    /// The model finished its reply turn.
    TurnComplete,
    /// The channel closed. `normal` distinguishes an intentional close from
    /// a failure the UI should report.
    Closed { normal: bool },
    /// The transport failed; the session transitions to its error state.
    Failed(EngineError),
}

/// Callback invoked once per inbound wire chunk with decoded samples
/// (f32 in [-1, 1], at the provider's 24kHz output rate).
pub type AudioCallback =
    Arc<dyn Fn(Vec<f32>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback for protocol-level state events.
pub type EventCallback =
    Arc<dyn Fn(TransportEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Base Trait
// =============================================================================

/// Duplex audio+control channel to a remote conversational AI endpoint.
///
/// # Contract
///
/// - `open` either fully establishes the channel or fails leaving no partial
///   resources allocated.
/// - `send_audio` never blocks the capture cadence: frames sent before the
///   outbound channel is ready (or while it is congested) are dropped, not
///   queued.
/// - `close` is idempotent and safe to call from an error handler; teardown
///   failures are swallowed.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Establish the channel for the given context.
    async fn open(&mut self, ctx: &SessionContext) -> EngineResult<()>;

    /// Encode and transmit one captured frame. Non-blocking; drops the frame
    /// if the transport is not ready.
    fn send_audio(&self, frame: &AudioFrame);

    /// Register the inbound-audio callback. Must be set before `open`.
    fn on_audio(&mut self, callback: AudioCallback);

    /// Register the state-event callback. Must be set before `open`.
    fn on_event(&mut self, callback: EventCallback);

    /// Whether the channel is currently established.
    fn is_open(&self) -> bool;

    /// Release the underlying socket/peer connection. Idempotent.
    async fn close(&mut self);
}

/// Boxed trait object for transport sessions.
pub type BoxedTransport = Box<dyn TransportSession>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::WebSocket.to_string(), "websocket");
        assert_eq!(TransportKind::WebRtc.to_string(), "webrtc");
    }

    #[test]
    fn test_transport_kind_serde() {
        assert_eq!(
            serde_json::to_string(&TransportKind::WebRtc).unwrap(),
            "\"webrtc\""
        );
        let kind: TransportKind = serde_json::from_str("\"websocket\"").unwrap();
        assert_eq!(kind, TransportKind::WebSocket);
    }

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!("webrtc".parse::<TransportKind>(), Ok(TransportKind::WebRtc));
        assert_eq!("WS".parse::<TransportKind>(), Ok(TransportKind::WebSocket));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_fallback_instructions_mention_property() {
        let text = SessionContext::fallback_instructions("prop-42");
        assert!(text.contains("prop-42"));
    }
}

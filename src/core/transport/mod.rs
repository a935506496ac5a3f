//! Transport sessions to the remote conversational AI endpoint.
//!
//! Two mutually incompatible protocol variants implement one abstract
//! contract:
//!
//! - **WebSocket** - persistent socket, JSON envelopes, base64 PCM16 payloads
//! - **WebRTC** - SDP-negotiated peer connection, native L16 audio tracks,
//!   JSON control events over a data channel
//!
//! The engine and UI depend only on [`TransportSession`]; nothing outside
//! this module branches on protocol kind.

pub mod base;
pub mod webrtc;
pub mod websocket;

pub use base::{
    AudioCallback, BoxedTransport, EventCallback, SessionContext, TransportEvent, TransportKind,
    TransportSession,
};
pub use webrtc::WebRtcSession;
pub use websocket::WebSocketSession;

use crate::config::EngineConfig;

/// Create the transport variant selected by `kind`.
pub fn create_transport(kind: TransportKind, config: &EngineConfig) -> BoxedTransport {
    match kind {
        TransportKind::WebSocket => Box::new(WebSocketSession::new(config)),
        TransportKind::WebRtc => Box::new(WebRtcSession::new(config)),
    }
}

//! SDP-negotiated WebRTC transport variant.

pub mod client;
pub mod events;
pub mod signaling;

pub use client::WebRtcSession;
pub use signaling::SignalingClient;

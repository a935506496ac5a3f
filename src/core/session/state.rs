//! Session state machine.
//!
//! One authoritative enum replaces the independent `isConnected` /
//! `isListening` / `isSpeaking` flags the UI consumes; the booleans are
//! derived, so impossible combinations (speaking while idle) cannot be
//! represented. Transitions are validated in one place and applied strictly
//! in the order their triggering events are observed.

use std::fmt;

/// Lifecycle state of the single active session.
///
/// `Idle → Connecting → Connected → {Listening ⇄ Speaking} → Closing → Idle`,
/// with `Error` reachable from any non-idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// Context fetch, device acquisition, and protocol handshake in flight.
    Connecting,
    /// Channel established; neither side is currently speaking.
    Connected,
    /// The provider detected user speech.
    Listening,
    /// Model audio is rendering.
    Speaking,
    /// Teardown in progress.
    Closing,
    /// Terminal failure; resources are released and a new start is allowed.
    Error,
}

impl SessionState {
    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            // Re-entering the same state is always a no-op.
            (a, b) if a == b => true,
            (Idle, Connecting) => true,
            (Connecting, Connected) => true,
            // Active states move freely among themselves.
            (Connected | Listening | Speaking, Connected | Listening | Speaking) => true,
            // Stop is allowed from anywhere.
            (_, Closing) => true,
            (Closing, Idle) => true,
            // Error is reachable from any non-idle state.
            (Connecting | Connected | Listening | Speaking | Closing, Error) => true,
            // Retry after a failed or stopped session.
            (Error, Connecting) => true,
            (Error, Idle) => true,
            _ => false,
        }
    }

    /// The channel is established (listening and speaking imply connected).
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Listening | SessionState::Speaking
        )
    }

    pub fn is_listening(self) -> bool {
        self == SessionState::Listening
    }

    pub fn is_speaking(self) -> bool {
        self == SessionState::Speaking
    }

    /// Simple UI wiring: connected OR listening OR speaking.
    pub fn is_call_active(self) -> bool {
        self.is_connected()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Listening => "listening",
            SessionState::Speaking => "speaking",
            SessionState::Closing => "closing",
            SessionState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

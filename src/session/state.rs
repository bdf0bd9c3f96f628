//! Connection and authentication state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle of a relay session.
///
/// ```text
/// Idle → Connecting → Open → (Closing) → Reconnecting → Connecting → …
///                                                  any → Stopped
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, never started.
    #[default]
    Idle,
    /// Handshake in progress on the live link.
    Connecting,
    /// Live link open, subscription sent.
    Open,
    /// Relay started the close handshake on the live link.
    Closing,
    /// Link lost; a reconnect is scheduled.
    Reconnecting,
    /// Shut down by the host. Terminal.
    Stopped,
}

impl ConnectionState {
    /// Returns `true` once the session has been stopped.
    #[inline]
    #[must_use]
    pub fn is_stopped(self) -> bool {
        self == Self::Stopped
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// ============================================================================
// AuthState
// ============================================================================

/// Pending AUTH handshake.
///
/// At most one response id is pending; a new challenge discards it so a late
/// `OK` for the old response no longer matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pending_challenge: Option<String>,
    pending_event_id: Option<String>,
}

impl AuthState {
    /// Records a fresh challenge, dropping any pending response id.
    pub fn record_challenge(&mut self, challenge: impl Into<String>) {
        self.pending_challenge = Some(challenge.into());
        self.pending_event_id = None;
    }

    /// Records the id of a response about to be sent.
    pub fn record_response(&mut self, event_id: impl Into<String>) {
        self.pending_event_id = Some(event_id.into());
    }

    /// Applies an `OK` acknowledgment.
    ///
    /// Returns `true` and clears the handshake only when `event_id` matches
    /// the pending response and the relay accepted it.
    pub fn confirm(&mut self, event_id: &str, accepted: bool) -> bool {
        if !accepted || self.pending_event_id.as_deref() != Some(event_id) {
            return false;
        }
        self.clear();
        true
    }

    /// Forgets the handshake.
    pub fn clear(&mut self) {
        self.pending_challenge = None;
        self.pending_event_id = None;
    }

    /// Returns the challenge awaiting confirmation.
    #[inline]
    #[must_use]
    pub fn pending_challenge(&self) -> Option<&str> {
        self.pending_challenge.as_deref()
    }

    /// Returns the id of the response awaiting `OK`.
    #[inline]
    #[must_use]
    pub fn pending_event_id(&self) -> Option<&str> {
        self.pending_event_id.as_deref()
    }
}

// ============================================================================
// Tests
// ============================================================================

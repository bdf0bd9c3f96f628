//! WebSocket transport layer.
//!
//! The session drives the socket through the [`Transport`] capability set and
//! hears back through [`TransportNotification`]s on a channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  open / send / close   ┌──────────────────┐
//! │  SessionMachine  │───────────────────────►│  WsTransport     │
//! │                  │                        │  (one task per   │         ┌─────────┐
//! │                  │◄───────────────────────│   link)          │◄───────►│  Relay  │
//! └──────────────────┘  TransportNotification └──────────────────┘   WS    └─────────┘
//! ```
//!
//! # Link Lifecycle
//!
//! 1. `open` - allocate a [`LinkId`], start connecting
//! 2. [`TransportEvent::Open`] - handshake completed
//! 3. [`TransportEvent::Message`] - one per text frame
//! 4. [`TransportEvent::Closing`] - relay started the close handshake
//! 5. [`TransportEvent::Closed`] or [`TransportEvent::Failure`] - link is gone
//!
//! Notifications for one link are produced by a single task, so they are
//! never delivered concurrently.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | `tokio-tungstenite` client transport |

// ============================================================================
// Submodules
// ============================================================================

/// `tokio-tungstenite` client transport.
pub mod websocket;

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;
use crate::identifiers::LinkId;

// ============================================================================
// Re-exports
// ============================================================================

pub use websocket::WsTransport;

// ============================================================================
// Types
// ============================================================================

/// Sending half of the notification channel.
pub type NotificationSender = mpsc::UnboundedSender<TransportNotification>;

/// Receiving half of the notification channel.
pub type NotificationReceiver = mpsc::UnboundedReceiver<TransportNotification>;

// ============================================================================
// Transport
// ============================================================================

/// Capabilities the session needs from a socket library.
///
/// Implementations report progress asynchronously through the
/// [`NotificationSender`] they were built with.
pub trait Transport: Send {
    /// Starts connecting to `url` and returns the new link's id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) if the
    /// connection attempt cannot be started.
    fn open(&mut self, url: &Url) -> Result<LinkId>;

    /// Sends a text frame on `link`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) if the link is
    /// unknown or already gone.
    fn send(&mut self, link: LinkId, text: &str) -> Result<()>;

    /// Closes `link` with a close code and reason.
    ///
    /// Closing an unknown link is a no-op.
    fn close(&mut self, link: LinkId, code: u16, reason: &str);
}

// ============================================================================
// Notifications
// ============================================================================

/// A notification from the transport, tagged with its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportNotification {
    /// Link the event belongs to.
    pub link: LinkId,
    /// What happened.
    pub event: TransportEvent,
}

impl TransportNotification {
    /// Creates a notification.
    #[inline]
    #[must_use]
    pub fn new(link: LinkId, event: TransportEvent) -> Self {
        Self { link, event }
    }
}

/// Link lifecycle and data events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established.
    Open,

    /// Text frame received.
    Message(String),

    /// Relay initiated the close handshake.
    Closing {
        /// Close code sent by the relay.
        code: u16,
        /// Close reason sent by the relay.
        reason: String,
    },

    /// Connection closed.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// Connection failed.
    Failure {
        /// Description of the failure.
        error: String,
    },
}

impl TransportEvent {
    /// Returns `true` if the link is gone after this event.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failure { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(
            TransportEvent::Closed {
                code: 1000,
                reason: String::new()
            }
            .is_terminal()
        );
        assert!(
            TransportEvent::Failure {
                error: "timeout".into()
            }
            .is_terminal()
        );
        assert!(!TransportEvent::Open.is_terminal());
        assert!(
            !TransportEvent::Closing {
                code: 1001,
                reason: String::new()
            }
            .is_terminal()
        );
    }
}

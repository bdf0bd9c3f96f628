//! Error types for the relay push client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use relay_push::{EndpointParams, RelaySession, Result};
//!
//! async fn example(session: &RelaySession, params: EndpointParams) -> Result<()> {
//!     session.start_with(params).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Handling |
//! |----------|----------|----------|
//! | Configuration | [`Error::Config`] | Surfaced to host, session never starts |
//! | Protocol | [`Error::Decode`] | Logged, frame dropped |
//! | Connection | [`Error::Transport`], [`Error::ConnectionClosed`] | Reconnect |
//! | Session | [`Error::SessionClosed`] | Host call after stop |
//! | External | [`Error::Io`], [`Error::Json`] | Config persistence |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// No variant is ever fatal to the process: every failure either drops the
/// offending frame or funnels into the reconnect path.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the endpoint is missing its URL or identity, or the
    /// URL is not a WebSocket URL.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unrecognized relay frame.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of what was wrong with the frame.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport open/send/close failure.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// WebSocket connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The session actor has shut down.
    ///
    /// Returned by host calls made after [`stop`](crate::RelaySession::stop).
    #[error("Session closed")]
    SessionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a configuration error.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns `true` if this is a frame decode error.
    #[inline]
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Json(_))
    }

    /// Returns `true` if this is a transport error.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::ConnectionClosed)
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors are cured by reconnecting.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_transport_error()
    }
}

// ============================================================================
// Tests
// ============================================================================

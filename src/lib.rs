//! Relay Push - resilient subscription client for push relays.
//!
//! This library keeps one standing subscription open against a
//! publish/subscribe relay and wakes the host application when a matching
//! event arrives.
//!
//! # Architecture
//!
//! The client follows an actor model:
//!
//! - **Session (actor)**: owns the state machine and the live transport link
//! - **Transport**: one WebSocket link at a time, one task per link
//! - **Host**: signs AUTH challenges and decides whether to surface events
//!
//! Key design principles:
//!
//! - Exactly one live link per session; stale links are ignored
//! - Single reconnect slot, never additive
//! - Subscription id reused across reconnects, rotated after AUTH
//! - Malformed frames are dropped, never fatal
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_push::{AuthBridge, EndpointParams, FnSink, RelaySession, Result, SessionConfig};
//!
//! struct Signer;
//!
//! impl AuthBridge for Signer {
//!     fn request_auth(&self, relay: &str, challenge: &str) {
//!         // Sign a kind 22242 event and hand it back via submit_auth_response
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let sink = FnSink::new(|| false, || println!("wake up"));
//!     let session = RelaySession::spawn(SessionConfig::default(), Arc::new(Signer), Arc::new(sink));
//!
//!     session
//!         .start_with(EndpointParams::new("wss://push.example.com", "ab12cd"))
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     session.stop().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Tunables, endpoint validation, persistence |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`host`] | [`EventSink`] and [`AuthBridge`] collaborators |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Frame codec |
//! | [`session`] | [`RelaySession`] and its state machine |
//! | [`transport`] | WebSocket transport layer |

// ============================================================================
// Modules
// ============================================================================

/// Session tunables, endpoint validation and persistence.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Host-side collaborators.
pub mod host;

/// Type-safe identifiers.
pub mod identifiers;

/// Relay protocol frames.
pub mod protocol;

/// Relay session actor and state machine.
pub mod session;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Config types
pub use config::{
    ConfigStore, Endpoint, EndpointParams, PendingChallenge, SessionConfig, resolve_endpoint,
};

// Error types
pub use error::{Error, Result};

// Host types
pub use host::{AuthBridge, EventSink, FnSink, NoAuth, StoreAuthBridge};

// Identifier types
pub use identifiers::{LinkId, SubscriptionId};

// Protocol types
pub use protocol::{Filter, Frame};

// Session types
pub use session::{AuthState, ConnectionState, RelaySession, SessionMachine};

// Transport types
pub use transport::{Transport, TransportEvent, TransportNotification, WsTransport};

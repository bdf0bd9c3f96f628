//! Relay protocol frames.
//!
//! Every frame on the wire is a JSON array whose first element is a
//! message type tag.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `REQ` | Client → Relay | Register the subscription filter |
//! | `AUTH` (event) | Client → Relay | Signed challenge response |
//! | `EVENT` | Relay → Client | Event matching the subscription |
//! | `EOSE` | Relay → Client | End of stored events |
//! | `NOTICE` | Relay → Client | Human-readable message |
//! | `CLOSED` | Relay → Client | Subscription closed by relay |
//! | `AUTH` (challenge) | Relay → Client | Authentication challenge |
//! | `OK` | Relay → Client | Acknowledgment of a submitted event |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `auth` | AUTH response inspection |
//! | `filter` | Subscription filter and REQ encoding |
//! | `frame` | Inbound frame decoding |

// ============================================================================
// Submodules
// ============================================================================

/// AUTH response inspection.
pub mod auth;

/// Subscription filter and REQ encoding.
pub mod filter;

/// Inbound frame decoding.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use auth::extract_auth_event_id;
pub use filter::{Filter, encode_subscribe};
pub use frame::{Frame, decode};

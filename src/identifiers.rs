//! Type-safe identifiers.
//!
//! Newtype wrappers keep subscription tokens and transport handles from
//! being mixed up with arbitrary strings and integers.
//!
//! | Type | Wraps | Scope |
//! |------|-------|-------|
//! | [`SubscriptionId`] | lowercase hex `String` | One REQ on the relay |
//! | [`LinkId`] | `u64` | One transport handle |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Alphabet used for subscription ids.
const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Default subscription id length in hex digits.
pub const DEFAULT_SUBSCRIPTION_ID_LEN: usize = 16;

// ============================================================================
// SubscriptionId
// ============================================================================

/// Opaque token naming the current REQ.
///
/// Reused across ordinary reconnects, rotated after a successful AUTH.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Wraps an existing id string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random lowercase hex id of `len` digits.
    #[must_use]
    pub fn generate(len: usize) -> Self {
        let mut rng = rand::rng();
        let id = (0..len)
            .map(|_| char::from(HEX_DIGITS[rng.random_range(0..HEX_DIGITS.len())]))
            .collect();
        Self(id)
    }

    /// Generates a random id guaranteed to differ from `previous`.
    ///
    /// A zero length can only ever produce the empty id, so `len` is
    /// clamped to at least one digit.
    #[must_use]
    pub fn generate_distinct(len: usize, previous: &Self) -> Self {
        let len = len.max(1);
        loop {
            let candidate = Self::generate(len);
            if &candidate != previous {
                return candidate;
            }
        }
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// LinkId
// ============================================================================

/// Process-wide counter for link ids.
static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one transport handle.
///
/// Every `open` yields a fresh id; notifications carry it so the session can
/// tell its live link apart from retired ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    /// Allocates the next link id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw value. Intended for custom [`Transport`](crate::Transport)
    /// implementations that allocate their own ids.
    #[inline]
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

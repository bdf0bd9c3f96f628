//! Host-side collaborators.
//!
//! The session never touches platform notification or signing APIs. It calls
//! into these traits instead; both are borrowed (`Arc`) and never owned
//! exclusively by the session.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tracing::{info, warn};

use crate::config::{ConfigStore, PendingChallenge};

// ============================================================================
// EventSink
// ============================================================================

/// Receives wake-ups for subscribed events.
///
/// Queried once per received `EVENT` frame.
pub trait EventSink: Send + Sync {
    /// Returns `true` when the consumer is already active in the foreground
    /// and a wake-up would be redundant.
    fn should_suppress_activation(&self) -> bool;

    /// Surfaces the event, e.g. by posting a notification.
    fn activate(&self);
}

// ============================================================================
// AuthBridge
// ============================================================================

/// Produces signed AUTH responses.
///
/// Fire-and-forget: the bridge answers later by calling
/// [`RelaySession::submit_auth_response`](crate::RelaySession::submit_auth_response).
/// The session enforces no timeout.
pub trait AuthBridge: Send + Sync {
    /// Asks the host to sign a response to `challenge` issued by `relay`.
    fn request_auth(&self, relay: &str, challenge: &str);
}

/// An [`AuthBridge`] that leaves challenges in a [`ConfigStore`].
///
/// For hosts whose signer lives in another process: the signer reads the
/// challenge with [`ConfigStore::load_challenge`], answers through
/// [`RelaySession::submit_auth_response`](crate::RelaySession::submit_auth_response)
/// and clears it.
#[derive(Debug, Clone)]
pub struct StoreAuthBridge {
    store: ConfigStore,
}

impl StoreAuthBridge {
    /// Creates a bridge writing to `store`.
    #[inline]
    #[must_use]
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    /// Returns the backing store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }
}

impl AuthBridge for StoreAuthBridge {
    fn request_auth(&self, relay: &str, challenge: &str) {
        match self.store.save_challenge(&PendingChallenge::new(relay, challenge)) {
            Ok(()) => info!(%relay, "AUTH challenge stored for signer"),
            Err(e) => warn!(error = %e, "Failed to store AUTH challenge"),
        }
    }
}

// ============================================================================
// No-op Implementations
// ============================================================================

/// An [`AuthBridge`] that never answers.
///
/// Sessions using it stay subscribed but unauthenticated.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

impl AuthBridge for NoAuth {
    fn request_auth(&self, _relay: &str, _challenge: &str) {}
}

/// Adapts a pair of closures into an [`EventSink`].
pub struct FnSink<S, A> {
    suppress: S,
    activate: A,
}

impl<S, A> FnSink<S, A>
where
    S: Fn() -> bool + Send + Sync,
    A: Fn() + Send + Sync,
{
    /// Creates a sink from a suppression predicate and an activation action.
    pub fn new(suppress: S, activate: A) -> Self {
        Self { suppress, activate }
    }
}

impl<S, A> EventSink for FnSink<S, A>
where
    S: Fn() -> bool + Send + Sync,
    A: Fn() + Send + Sync,
{
    fn should_suppress_activation(&self) -> bool {
        (self.suppress)()
    }

    fn activate(&self) {
        (self.activate)();
    }
}

impl<S, A> fmt::Debug for FnSink<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tempfile::tempdir;

    use crate::config::EndpointParams;

    #[test]
    fn test_fn_sink() {
        let foreground = AtomicBool::new(true);
        let activations = AtomicUsize::new(0);
        let sink = FnSink::new(
            || foreground.load(Ordering::SeqCst),
            || {
                activations.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(sink.should_suppress_activation());
        foreground.store(false, Ordering::SeqCst);
        assert!(!sink.should_suppress_activation());

        sink.activate();
        assert_eq!(activations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_store_bridge_persists_challenge() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("push_service.json"));
        store.save(&EndpointParams::new("wss://Relay.Example.com", "pk")).unwrap();

        let bridge = StoreAuthBridge::new(store.clone());
        bridge.request_auth("wss://Relay.Example.com", "c1");
        bridge.request_auth("wss://Relay.Example.com", "c2");

        let pending = store.load_challenge().unwrap().unwrap();
        assert_eq!(pending, PendingChallenge::new("wss://Relay.Example.com", "c2"));
        assert_eq!(
            store.load().unwrap().unwrap().url.as_deref(),
            Some("wss://Relay.Example.com")
        );
    }
}

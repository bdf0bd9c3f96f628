//! Session configuration, endpoint validation and persistence.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use relay_push::{ConfigStore, EndpointParams, SessionConfig, resolve_endpoint};
//!
//! let config = SessionConfig::new().with_reconnect_delay(Duration::from_secs(2));
//!
//! let store = ConfigStore::new("/data/push_service.json");
//! let supplied = EndpointParams::new("wss://push.example.com", "npub-hex");
//! let endpoint = resolve_endpoint(Some(supplied), &store)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::DEFAULT_SUBSCRIPTION_ID_LEN;

// ============================================================================
// Constants
// ============================================================================

/// Delay before reconnecting after a close or failure.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Timeout for establishing the WebSocket connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Event kinds subscribed to by default.
pub const DEFAULT_KINDS: [u32; 2] = [20285, 20284];

/// Tag keyed to the identity.
pub const DEFAULT_TAG_NAME: &str = "h";

/// Close code used for deliberate closes.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

// ============================================================================
// SessionConfig
// ============================================================================

/// Tunables of a relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delay between a lost connection and the next attempt.
    pub reconnect_delay: Duration,

    /// Maximum time to wait for the WebSocket handshake.
    pub connect_timeout: Duration,

    /// Length of generated subscription ids in hex digits.
    pub subscription_id_len: usize,

    /// Event kinds to subscribe to.
    pub kinds: Vec<u32>,

    /// Name of the tag matched against the identity.
    pub tag_name: String,

    /// Close code sent on deliberate closes.
    pub close_code: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    /// Creates a config with default tunables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            subscription_id_len: DEFAULT_SUBSCRIPTION_ID_LEN,
            kinds: DEFAULT_KINDS.to_vec(),
            tag_name: DEFAULT_TAG_NAME.to_owned(),
            close_code: NORMAL_CLOSE_CODE,
        }
    }

    /// Sets the reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the subscription id length.
    #[inline]
    #[must_use]
    pub fn with_subscription_id_len(mut self, len: usize) -> Self {
        self.subscription_id_len = len;
        self
    }

    /// Sets the subscribed event kinds.
    #[inline]
    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    /// Sets the tag matched against the identity.
    #[inline]
    #[must_use]
    pub fn with_tag_name(mut self, tag_name: impl Into<String>) -> Self {
        self.tag_name = tag_name.into();
        self
    }
}

// ============================================================================
// EndpointParams
// ============================================================================

/// Raw endpoint values as supplied by the host or loaded from storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointParams {
    /// Relay WebSocket URL.
    #[serde(default, rename = "server_relay")]
    pub url: Option<String>,

    /// Device id; defaults to the identity.
    #[serde(default)]
    pub device_id: Option<String>,

    /// Public key of the subscriber.
    #[serde(default, rename = "pubkey")]
    pub identity: Option<String>,
}

impl EndpointParams {
    /// Creates params with a URL and identity.
    #[must_use]
    pub fn new(url: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            device_id: None,
            identity: Some(identity.into()),
        }
    }

    /// Sets the device id.
    #[inline]
    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Returns `true` if no field carries a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.device_id.is_none() && self.identity.is_none()
    }

    /// Fills absent or empty fields from `other`.
    pub fn merge_missing(&mut self, other: &Self) {
        fill(&mut self.url, &other.url);
        fill(&mut self.device_id, &other.device_id);
        fill(&mut self.identity, &other.identity);
    }
}

/// Replaces a missing or empty value.
fn fill(slot: &mut Option<String>, fallback: &Option<String>) {
    if slot.as_deref().is_none_or(str::is_empty) && fallback.is_some() {
        slot.clone_from(fallback);
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Validated relay endpoint.
///
/// Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// URL exactly as supplied; AUTH responses are signed over this string.
    relay: String,
    url: Url,
    device_id: String,
    identity: String,
}

impl Endpoint {
    /// Validates and builds an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL or identity is missing, or the
    /// URL is not `ws://` or `wss://`.
    pub fn new(relay: &str, device_id: Option<&str>, identity: &str) -> Result<Self> {
        if relay.is_empty() {
            return Err(Error::config("relay URL is required"));
        }
        if identity.is_empty() {
            return Err(Error::config("identity is required"));
        }

        let url = Url::parse(relay).map_err(|e| Error::config(format!("invalid relay URL: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "relay URL must use ws or wss, got {}",
                url.scheme()
            )));
        }

        let device_id = device_id
            .filter(|id| !id.is_empty())
            .unwrap_or(identity)
            .to_owned();

        Ok(Self {
            relay: relay.to_owned(),
            url,
            device_id,
            identity: identity.to_owned(),
        })
    }

    /// Returns the parsed relay URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the relay URL as the host supplied it.
    #[inline]
    #[must_use]
    pub fn relay(&self) -> &str {
        &self.relay
    }

    /// Returns the device id.
    #[inline]
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the identity.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl TryFrom<EndpointParams> for Endpoint {
    type Error = Error;

    fn try_from(params: EndpointParams) -> Result<Self> {
        Self::new(
            params.url.as_deref().unwrap_or_default(),
            params.device_id.as_deref(),
            params.identity.as_deref().unwrap_or_default(),
        )
    }
}

impl From<&Endpoint> for EndpointParams {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            url: Some(endpoint.relay.clone()),
            device_id: Some(endpoint.device_id.clone()),
            identity: Some(endpoint.identity.clone()),
        }
    }
}

// ============================================================================
// PendingChallenge
// ============================================================================

/// AUTH challenge waiting for a signer that may run in another process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    /// Challenge string issued by the relay.
    pub challenge: String,

    /// Relay URL the response must be signed for.
    pub relay: String,
}

impl PendingChallenge {
    /// Creates a pending challenge.
    #[must_use]
    pub fn new(relay: impl Into<String>, challenge: impl Into<String>) -> Self {
        Self {
            challenge: challenge.into(),
            relay: relay.into(),
        }
    }
}

/// On-disk layout of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredConfig {
    #[serde(flatten)]
    endpoint: EndpointParams,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_challenge: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_relay: Option<String>,
}

// ============================================================================
// ConfigStore
// ============================================================================

/// JSON file holding the last endpoint supplied by the host.
///
/// Lets a session come back after the host process is restarted without
/// fresh values. The same file carries the latest AUTH challenge so a signer
/// started later can pick it up.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Creates a store backed by `path`.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted params.
    ///
    /// Returns `Ok(None)` if nothing was persisted yet.
    pub fn load(&self) -> Result<Option<EndpointParams>> {
        let Some(stored) = self.read()? else {
            return Ok(None);
        };

        debug!(path = %self.path.display(), "Loaded endpoint config");
        Ok(Some(stored.endpoint).filter(|params| !params.is_empty()))
    }

    /// Persists the params, replacing the previous file atomically.
    ///
    /// Params with no values are not written. A stored challenge is kept.
    pub fn save(&self, params: &EndpointParams) -> Result<()> {
        if params.is_empty() {
            debug!("Skipping save of empty endpoint config");
            return Ok(());
        }

        let mut stored = self.read()?.unwrap_or_default();
        stored.endpoint = params.clone();
        self.write(&stored)?;

        debug!(path = %self.path.display(), "Saved endpoint config");
        Ok(())
    }

    /// Loads the pending AUTH challenge, if both challenge and relay are set.
    pub fn load_challenge(&self) -> Result<Option<PendingChallenge>> {
        let Some(stored) = self.read()? else {
            return Ok(None);
        };

        Ok(stored
            .auth_challenge
            .zip(stored.auth_relay)
            .map(|(challenge, relay)| PendingChallenge { challenge, relay }))
    }

    /// Persists an AUTH challenge next to the endpoint, replacing any older one.
    pub fn save_challenge(&self, pending: &PendingChallenge) -> Result<()> {
        let mut stored = self.read()?.unwrap_or_default();
        stored.auth_challenge = Some(pending.challenge.clone());
        stored.auth_relay = Some(pending.relay.clone());
        self.write(&stored)?;

        debug!(path = %self.path.display(), relay = %pending.relay, "Saved AUTH challenge");
        Ok(())
    }

    /// Forgets the pending AUTH challenge.
    pub fn clear_challenge(&self) -> Result<()> {
        let Some(mut stored) = self.read()? else {
            return Ok(());
        };
        if stored.auth_challenge.is_none() && stored.auth_relay.is_none() {
            return Ok(());
        }

        stored.auth_challenge = None;
        stored.auth_relay = None;
        self.write(&stored)
    }

    fn read(&self) -> Result<Option<StoredConfig>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn write(&self, stored: &StoredConfig) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(stored)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolves the endpoint to start a session with.
///
/// Supplied params are persisted and then completed from storage; without
/// supplied params the persisted ones are used as is.
///
/// # Errors
///
/// Returns [`Error::Config`] if the merged values are incomplete. A failure
/// to read or write the store is logged and does not block startup when the
/// supplied values are complete on their own.
pub fn resolve_endpoint(supplied: Option<EndpointParams>, store: &ConfigStore) -> Result<Endpoint> {
    let mut params = match supplied {
        Some(params) => {
            if let Err(e) = store.save(&params) {
                warn!(error = %e, "Failed to persist endpoint config");
            }
            params
        }
        None => EndpointParams::default(),
    };

    match store.load() {
        Ok(Some(persisted)) => params.merge_missing(&persisted),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Failed to load endpoint config"),
    }

    Endpoint::try_from(params)
}

// ============================================================================
// Tests
// ============================================================================

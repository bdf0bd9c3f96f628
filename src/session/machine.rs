//! Relay session state machine.
//!
//! [`SessionMachine`] holds every piece of mutable session state and reacts
//! to host calls, transport notifications and the reconnect timer. It never
//! blocks and never awaits; the actor in [`super`] serializes calls into it.
//!
//! # Transitions
//!
//! | Input | Effect |
//! |-------|--------|
//! | `start` | Open a link unless one is already connecting or open |
//! | `Open` | Send REQ with the current subscription id |
//! | `EVENT` | Activate the sink unless it asks for suppression |
//! | `AUTH` | Record challenge, ask the bridge to sign |
//! | `OK` (matching, accepted) | Rotate subscription id, resend REQ |
//! | `Closed` / `Failure` | Schedule one reconnect |
//! | reconnect timer | Open a new link |
//! | `stop` | Cancel timer, close link, become `Stopped` |
//!
//! Notifications from any link other than the live one are ignored. A link
//! retired by a deliberate reconnect therefore never schedules a second
//! reconnect when its close arrives.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{Endpoint, SessionConfig};
use crate::error::{Error, Result};
use crate::host::{AuthBridge, EventSink};
use crate::identifiers::{LinkId, SubscriptionId};
use crate::protocol::{Filter, Frame, decode, encode_subscribe, extract_auth_event_id};
use crate::transport::{Transport, TransportEvent, TransportNotification};

use super::state::{AuthState, ConnectionState};

// ============================================================================
// Constants
// ============================================================================

/// Close reason for a link replaced by a new one.
const RECONNECT_REASON: &str = "Reconnecting";

/// Close reason for a link abandoned after a send failure.
const SEND_FAILED_REASON: &str = "Send failed";

/// Close reason on host shutdown.
const STOP_REASON: &str = "Service stopping";

// ============================================================================
// SessionMachine
// ============================================================================

/// One logical subscription to one relay.
pub struct SessionMachine<T> {
    config: SessionConfig,
    transport: T,
    auth_bridge: Arc<dyn AuthBridge>,
    sink: Arc<dyn EventSink>,

    endpoint: Option<Endpoint>,
    state: ConnectionState,
    /// The only link whose notifications are acted upon.
    link: Option<LinkId>,
    /// Link closed by a deliberate reconnect, awaiting its final notification.
    retired: Option<LinkId>,

    subscription: Option<SubscriptionId>,
    rotate_subscription: bool,
    auth: AuthState,

    /// Single reconnect slot.
    reconnect_at: Option<Instant>,
}

// ============================================================================
// SessionMachine - Constructor & Accessors
// ============================================================================

impl<T: Transport> SessionMachine<T> {
    /// Creates an idle machine.
    pub fn new(
        config: SessionConfig,
        transport: T,
        auth_bridge: Arc<dyn AuthBridge>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            transport,
            auth_bridge,
            sink,
            endpoint: None,
            state: ConnectionState::Idle,
            link: None,
            retired: None,
            subscription: None,
            rotate_subscription: false,
            auth: AuthState::default(),
            reconnect_at: None,
        }
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the endpoint, once started.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Returns the subscription id last sent.
    #[inline]
    #[must_use]
    pub fn subscription_id(&self) -> Option<&SubscriptionId> {
        self.subscription.as_ref()
    }

    /// Returns the AUTH handshake state.
    #[inline]
    #[must_use]
    pub fn auth_state(&self) -> &AuthState {
        &self.auth
    }

    /// Returns the live link.
    #[inline]
    #[must_use]
    pub fn live_link(&self) -> Option<LinkId> {
        self.link
    }

    /// Returns when the scheduled reconnect is due.
    #[inline]
    #[must_use]
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Returns the transport.
    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

// ============================================================================
// SessionMachine - Host Calls
// ============================================================================

impl<T: Transport> SessionMachine<T> {
    /// Starts the session on `endpoint`.
    ///
    /// Idempotent while a link is connecting or open. A pending reconnect is
    /// cancelled in favour of connecting now.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the session already runs on another endpoint
    /// - [`Error::SessionClosed`] if the session was stopped
    pub fn start(&mut self, endpoint: Endpoint) -> Result<()> {
        if self.state.is_stopped() {
            return Err(Error::SessionClosed);
        }

        match &self.endpoint {
            Some(current) if *current != endpoint => {
                return Err(Error::config(
                    "endpoint is fixed for the session lifetime; stop and recreate the session",
                ));
            }
            Some(_) => {}
            None => self.endpoint = Some(endpoint),
        }

        self.connect();
        Ok(())
    }

    /// Sends a signed AUTH response on the open link.
    ///
    /// Dropped when no link is open; the relay re-issues its challenge on
    /// the next connection.
    pub fn submit_auth_response(&mut self, raw: &str) {
        let link = match (self.state, self.link) {
            (ConnectionState::Open, Some(link)) => link,
            _ => {
                debug!(state = %self.state, "No open link, dropping AUTH response");
                return;
            }
        };

        if raw.is_empty() {
            warn!("Ignoring empty AUTH response");
            return;
        }

        match extract_auth_event_id(raw) {
            Ok(event_id) => {
                debug!(%event_id, "Extracted AUTH event id");
                self.auth.record_response(event_id);
            }
            Err(e) => warn!(error = %e, "Failed to extract AUTH event id"),
        }

        info!(%link, "Sending AUTH response");
        if let Err(e) = self.transport.send(link, raw) {
            self.fail_link(link, &e);
        }
    }

    /// Shuts the session down. Idempotent.
    pub fn stop(&mut self) {
        if self.state.is_stopped() {
            return;
        }

        self.reconnect_at = None;
        if let Some(link) = self.link.take() {
            self.transport.close(link, self.config.close_code, STOP_REASON);
        }
        self.retired = None;
        self.auth.clear();
        self.set_state(ConnectionState::Stopped);

        info!("Session stopped");
    }
}

// ============================================================================
// SessionMachine - Transport & Timer Inputs
// ============================================================================

impl<T: Transport> SessionMachine<T> {
    /// Reacts to a transport notification.
    pub fn handle_notification(&mut self, notification: TransportNotification) {
        let TransportNotification { link, event } = notification;

        if self.link != Some(link) {
            if self.retired == Some(link) && event.is_terminal() {
                debug!(%link, "Retired link closed");
                self.retired = None;
            } else {
                trace!(%link, ?event, "Ignoring notification from inactive link");
            }
            return;
        }

        match event {
            TransportEvent::Open => self.on_open(link),

            TransportEvent::Message(text) => self.on_message(&text),

            TransportEvent::Closing { code, reason } => {
                debug!(%link, code, %reason, "Relay closing link");
                self.set_state(ConnectionState::Closing);
            }

            TransportEvent::Closed { code, reason } => {
                info!(%link, code, %reason, "Link closed");
                self.link_lost();
            }

            TransportEvent::Failure { error } => {
                warn!(%link, %error, "Link failed");
                self.link_lost();
            }
        }
    }

    /// Runs the scheduled reconnect.
    ///
    /// A no-op unless a reconnect is actually pending.
    pub fn fire_reconnect(&mut self) {
        if self.reconnect_at.take().is_none() {
            return;
        }

        info!("Attempting to reconnect");
        self.connect();
    }
}

// ============================================================================
// SessionMachine - Internals
// ============================================================================

impl<T: Transport> SessionMachine<T> {
    /// Opens a new link, retiring any link left over.
    fn connect(&mut self) {
        let Some(url) = self.endpoint.as_ref().map(|e| e.url().clone()) else {
            return;
        };

        match self.state {
            ConnectionState::Stopped => return,
            ConnectionState::Connecting | ConnectionState::Open if self.link.is_some() => {
                debug!(state = %self.state, "Already connecting or connected, skipping");
                return;
            }
            _ => {}
        }

        if self.reconnect_at.take().is_some() {
            debug!("Cancelled pending reconnect");
        }

        if let Some(old) = self.link.take() {
            debug!(link = %old, "Closing existing link first");
            self.transport.close(old, self.config.close_code, RECONNECT_REASON);
            self.retired = Some(old);
        }

        self.set_state(ConnectionState::Connecting);
        info!(%url, "Connecting to relay");

        match self.transport.open(&url) {
            Ok(link) => self.link = Some(link),
            Err(e) => {
                warn!(error = %e, "Failed to open link");
                self.link_lost();
            }
        }
    }

    fn on_open(&mut self, link: LinkId) {
        info!(%link, "Connected to relay");
        self.reconnect_at = None;
        self.set_state(ConnectionState::Open);
        self.send_subscription();
    }

    fn on_message(&mut self, text: &str) {
        let frame = match decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, %text, "Dropping malformed frame");
                return;
            }
        };

        trace!(kind = frame.kind(), "Received frame");

        match frame {
            Frame::Event { subscription_id, .. } => {
                if self.sink.should_suppress_activation() {
                    debug!(?subscription_id, "Consumer active, skipping activation");
                } else {
                    debug!(?subscription_id, "Consumer inactive, activating");
                    self.sink.activate();
                }
            }

            Frame::Eose { subscription_id } => {
                debug!(?subscription_id, "End of stored events");
            }

            Frame::Notice { message } => {
                info!(%message, "Relay notice");
            }

            Frame::Closed {
                subscription_id,
                message,
            } => {
                info!(?subscription_id, ?message, "Subscription closed by relay");
            }

            Frame::Auth { challenge } => {
                info!(%challenge, "Received AUTH challenge");
                self.auth.record_challenge(challenge.as_str());
                if let Some(endpoint) = &self.endpoint {
                    self.auth_bridge.request_auth(endpoint.relay(), &challenge);
                }
            }

            Frame::Ok {
                event_id,
                accepted,
                message,
            } => {
                debug!(%event_id, accepted, %message, "Received OK");
                if self.auth.confirm(&event_id, accepted) {
                    info!("AUTH successful, resubscribing");
                    self.rotate_subscription = true;
                    self.send_subscription();
                } else if !accepted && self.auth.pending_event_id() == Some(event_id.as_str()) {
                    warn!(%message, "AUTH rejected by relay");
                }
            }
        }
    }

    /// Sends REQ on the live link, rotating the id when required.
    fn send_subscription(&mut self) {
        let (Some(link), Some(endpoint)) = (self.link, self.endpoint.as_ref()) else {
            return;
        };

        let len = self.config.subscription_id_len;
        let id = match (&self.subscription, self.rotate_subscription) {
            (Some(current), false) => current.clone(),
            (Some(current), true) => SubscriptionId::generate_distinct(len, current),
            (None, _) => SubscriptionId::generate(len),
        };
        self.rotate_subscription = false;

        let filter = Filter::for_identity(
            self.config.kinds.iter().copied(),
            self.config.tag_name.as_str(),
            endpoint.identity(),
        );
        let frame = encode_subscribe(&id, &filter);

        debug!(%link, subscription_id = %id, "Sending subscription request");
        self.subscription = Some(id);

        if let Err(e) = self.transport.send(link, &frame) {
            self.fail_link(link, &e);
        }
    }

    /// Abandons the live link after a transport error.
    fn fail_link(&mut self, link: LinkId, error: &Error) {
        warn!(%link, %error, "Transport error, abandoning link");
        self.transport.close(link, self.config.close_code, SEND_FAILED_REASON);
        self.retired = Some(link);
        self.link_lost();
    }

    /// Forgets the live link and schedules a reconnect.
    fn link_lost(&mut self) {
        self.link = None;
        if self.state.is_stopped() {
            return;
        }
        self.set_state(ConnectionState::Reconnecting);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            debug!("Reconnect already scheduled");
            return;
        }

        let delay = self.config.reconnect_delay;
        self.reconnect_at = Some(Instant::now() + delay);
        info!(delay_ms = delay.as_millis() as u64, "Scheduled reconnect");
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            trace!(from = %self.state, to = %state, "State transition");
            self.state = state;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

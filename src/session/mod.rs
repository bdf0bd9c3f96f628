//! Relay session: the long-lived subscription client.
//!
//! A [`RelaySession`] is a cloneable handle to an actor task that owns a
//! [`SessionMachine`] and its transport. The actor serializes every input:
//!
//! - Host calls (`start`, `stop`, `submit_auth_response`)
//! - Transport notifications
//! - The single reconnect deadline
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_push::{EndpointParams, FnSink, NoAuth, RelaySession, SessionConfig};
//!
//! # async fn example() -> relay_push::Result<()> {
//! let sink = FnSink::new(|| false, || println!("new message"));
//! let session = RelaySession::spawn(SessionConfig::default(), Arc::new(NoAuth), Arc::new(sink));
//!
//! session
//!     .start_with(EndpointParams::new("wss://push.example.com", "ab12cd"))
//!     .await?;
//!
//! // ... later
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Session state machine.
pub mod machine;

/// Connection and authentication state.
pub mod state;

#[cfg(test)]
mod fake;

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::config::{Endpoint, EndpointParams, SessionConfig};
use crate::error::{Error, Result};
use crate::host::{AuthBridge, EventSink};
use crate::transport::{NotificationReceiver, Transport, WsTransport};

// ============================================================================
// Re-exports
// ============================================================================

pub use machine::SessionMachine;
pub use state::{AuthState, ConnectionState};

// ============================================================================
// SessionCommand
// ============================================================================

/// Host calls forwarded to the actor.
enum SessionCommand {
    /// Start on an endpoint.
    Start {
        endpoint: Endpoint,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Send a signed AUTH response.
    SubmitAuth(String),
    /// Shut down.
    Stop { reply: oneshot::Sender<()> },
}

// ============================================================================
// RelaySession
// ============================================================================

/// Handle to a running relay session.
///
/// Cheap to clone. The session stops when [`stop`](Self::stop) is called or
/// when the last handle is dropped.
#[derive(Clone)]
pub struct RelaySession {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl RelaySession {
    /// Spawns a session on a [`WsTransport`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: SessionConfig,
        auth_bridge: Arc<dyn AuthBridge>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let transport = WsTransport::with_connect_timeout(notify_tx, config.connect_timeout);
        Self::spawn_with_transport(config, transport, notify_rx, auth_bridge, sink)
    }

    /// Spawns a session on a custom transport.
    ///
    /// `notify_rx` must receive the notifications `transport` emits.
    pub fn spawn_with_transport<T>(
        config: SessionConfig,
        transport: T,
        notify_rx: NotificationReceiver,
        auth_bridge: Arc<dyn AuthBridge>,
        sink: Arc<dyn EventSink>,
    ) -> Self
    where
        T: Transport + 'static,
    {
        let machine = SessionMachine::new(config, transport, auth_bridge, sink);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        tokio::spawn(run_actor(machine, command_rx, notify_rx, state_tx));

        Self {
            command_tx,
            state_rx,
        }
    }

    /// Starts the session on a validated endpoint.
    ///
    /// Calling it again while connected or connecting is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the session already runs on another endpoint
    /// - [`Error::SessionClosed`] if the session was stopped
    pub async fn start(&self, endpoint: Endpoint) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::Start { endpoint, reply })
            .map_err(|_| Error::SessionClosed)?;

        reply_rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Validates raw params and starts the session.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the URL or identity is missing or invalid; the
    /// session is not started in that case.
    pub async fn start_with(&self, params: EndpointParams) -> Result<()> {
        let endpoint = Endpoint::try_from(params)?;
        self.start(endpoint).await
    }

    /// Forwards a signed `["AUTH", {...}]` frame to the relay.
    ///
    /// Dropped if no link is open when the actor processes it.
    ///
    /// # Errors
    ///
    /// [`Error::SessionClosed`] if the session was stopped.
    pub fn submit_auth_response(&self, raw: impl Into<String>) -> Result<()> {
        self.command_tx
            .send(SessionCommand::SubmitAuth(raw.into()))
            .map_err(|_| Error::SessionClosed)
    }

    /// Stops the session and waits for the actor to finish.
    ///
    /// Idempotent: stopping an already stopped session succeeds.
    pub async fn stop(&self) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        if self.command_tx.send(SessionCommand::Stop { reply }).is_err() {
            return Ok(());
        }

        let _ = reply_rx.await;
        Ok(())
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Waits until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// [`Error::SessionClosed`] if the actor ends first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        let mut state_rx = self.state_rx.clone();
        state_rx
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::SessionClosed)
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Actor loop owning the machine.
async fn run_actor<T: Transport>(
    mut machine: SessionMachine<T>,
    mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    mut notify_rx: NotificationReceiver,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut stop_reply = None;

    loop {
        let deadline = machine.reconnect_deadline();

        tokio::select! {
            command = command_rx.recv() => match command {
                Some(SessionCommand::Start { endpoint, reply }) => {
                    let result = machine.start(endpoint);
                    // Callers read `state()` as soon as the reply lands
                    publish_state(&state_tx, machine.state());
                    let _ = reply.send(result);
                }
                Some(SessionCommand::SubmitAuth(raw)) => machine.submit_auth_response(&raw),
                Some(SessionCommand::Stop { reply }) => {
                    stop_reply = Some(reply);
                    break;
                }
                None => {
                    debug!("All session handles dropped");
                    break;
                }
            },

            Some(notification) = notify_rx.recv() => machine.handle_notification(notification),

            () = reconnect_timer(deadline) => machine.fire_reconnect(),
        }

        publish_state(&state_tx, machine.state());
    }

    machine.stop();
    publish_state(&state_tx, machine.state());

    if let Some(reply) = stop_reply {
        let _ = reply.send(());
    }

    debug!("Session actor terminated");
}

/// Completes at `deadline`, or never when no reconnect is pending.
async fn reconnect_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Publishes the state if it changed.
fn publish_state(state_tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    state_tx.send_if_modified(|current| {
        if *current == state {
            return false;
        }
        *current = state;
        true
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::identifiers::LinkId;
    use crate::session::fake::{CountingSink, FakeTransport, RecordingBridge};
    use crate::transport::{NotificationSender, TransportEvent, TransportNotification};

    struct Fixture {
        session: RelaySession,
        transport: FakeTransport,
        notify_tx: NotificationSender,
        sink: Arc<CountingSink>,
        bridge: Arc<RecordingBridge>,
    }

    impl Fixture {
        fn spawn() -> Self {
            let (notify_tx, notify_rx) = mpsc::unbounded_channel();
            let transport = FakeTransport::default();
            let sink = Arc::new(CountingSink::default());
            let bridge = Arc::new(RecordingBridge::default());

            let session = RelaySession::spawn_with_transport(
                SessionConfig::default(),
                transport.clone(),
                notify_rx,
                Arc::clone(&bridge) as Arc<dyn AuthBridge>,
                Arc::clone(&sink) as Arc<dyn EventSink>,
            );

            Self {
                session,
                transport,
                notify_tx,
                sink,
                bridge,
            }
        }

        fn params() -> EndpointParams {
            EndpointParams::new("wss://relay.example.com", "pk")
        }

        fn last_link(&self) -> LinkId {
            *self.transport.log.lock().opened.last().unwrap()
        }

        fn opens(&self) -> usize {
            self.transport.log.lock().opened.len()
        }

        async fn notify(&self, event: TransportEvent) {
            let link = self.last_link();
            self.notify_tx
                .send(TransportNotification::new(link, event))
                .unwrap();
            settle().await;
        }
    }

    /// Lets the actor drain its queues.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_opens_and_subscribes() {
        let fx = Fixture::spawn();
        fx.session.start_with(Fixture::params()).await.unwrap();
        assert_eq!(fx.session.state(), ConnectionState::Connecting);

        fx.notify(TransportEvent::Open).await;
        assert_eq!(fx.session.state(), ConnectionState::Open);
        assert_eq!(fx.transport.log.lock().req_ids().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_state_visible_when_start_returns() {
        for _ in 0..50 {
            let fx = Fixture::spawn();
            fx.session.start_with(Fixture::params()).await.unwrap();
            assert_eq!(fx.session.state(), ConnectionState::Connecting);
            fx.session.stop().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_error_never_starts() {
        let fx = Fixture::spawn();
        let err = fx
            .session
            .start_with(EndpointParams {
                url: Some("wss://relay.example.com".into()),
                device_id: None,
                identity: None,
            })
            .await
            .unwrap_err();

        assert!(err.is_config_error());
        settle().await;
        assert_eq!(fx.opens(), 0);
        assert_eq!(fx.session.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reconnects_after_delay() {
        let fx = Fixture::spawn();
        fx.session.start_with(Fixture::params()).await.unwrap();
        fx.notify(TransportEvent::Open).await;

        fx.notify(TransportEvent::Failure {
            error: "timeout".into(),
        })
        .await;
        assert_eq!(fx.session.state(), ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert_eq!(fx.opens(), 1);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(fx.opens(), 2);
        assert_eq!(fx.session.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_scheduled_reconnect() {
        let fx = Fixture::spawn();
        fx.session.start_with(Fixture::params()).await.unwrap();
        fx.notify(TransportEvent::Failure {
            error: "refused".into(),
        })
        .await;

        fx.session.stop().await.unwrap();
        assert_eq!(fx.session.state(), ConnectionState::Stopped);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fx.opens(), 1);

        // Idempotent, and further calls report the closed session
        fx.session.stop().await.unwrap();
        assert!(matches!(
            fx.session.submit_auth_response("[]"),
            Err(Error::SessionClosed)
        ));
        assert!(matches!(
            fx.session.start_with(Fixture::params()).await,
            Err(Error::SessionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_round_trip_through_handle() {
        let fx = Fixture::spawn();
        fx.session.start_with(Fixture::params()).await.unwrap();
        fx.notify(TransportEvent::Open).await;

        fx.notify(TransportEvent::Message(r#"["AUTH","c1"]"#.into()))
            .await;
        assert_eq!(fx.bridge.requests.lock().len(), 1);

        fx.session
            .submit_auth_response(r#"["AUTH",{"id":"e1"}]"#)
            .unwrap();
        settle().await;

        fx.notify(TransportEvent::Message(r#"["OK","e1",true]"#.into()))
            .await;

        let reqs = fx.transport.log.lock().req_ids();
        assert_eq!(reqs.len(), 2);
        assert_ne!(reqs[0], reqs[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_activates_sink() {
        let fx = Fixture::spawn();
        fx.session.start_with(Fixture::params()).await.unwrap();
        fx.notify(TransportEvent::Open).await;

        fx.notify(TransportEvent::Message(r#"["EVENT","s",{}]"#.into()))
            .await;
        assert_eq!(fx.sink.activations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_stops_session() {
        let fx = Fixture::spawn();
        fx.session.start_with(Fixture::params()).await.unwrap();
        let link = fx.last_link();

        let Fixture {
            session, transport, ..
        } = fx;
        let observer = session.state_rx.clone();
        drop(session);
        settle().await;

        assert_eq!(*observer.borrow(), ConnectionState::Stopped);
        let closed = transport.log.lock().closed.clone();
        assert_eq!(closed, vec![(link, 1000, "Service stopping".to_owned())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state() {
        let fx = Fixture::spawn();
        fx.session.start_with(Fixture::params()).await.unwrap();

        let waiter = {
            let session = fx.session.clone();
            tokio::spawn(async move { session.wait_for_state(ConnectionState::Open).await })
        };
        fx.notify(TransportEvent::Open).await;

        waiter.await.unwrap().unwrap();
    }
}

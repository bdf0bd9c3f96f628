//! `tokio-tungstenite` client transport.
//!
//! Each link gets its own tokio task that:
//!
//! - Connects with a timeout
//! - Forwards incoming text frames as notifications
//! - Writes frames and close requests coming from the session
//! - Reports exactly one terminal `Closed` or `Failure`

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::{DEFAULT_CONNECT_TIMEOUT, NORMAL_CLOSE_CODE};
use crate::error::{Error, Result};
use crate::identifiers::LinkId;

use super::{NotificationSender, Transport, TransportEvent, TransportNotification};

// ============================================================================
// Constants
// ============================================================================

/// Code reported when the relay closed without a status.
const NO_STATUS_CODE: u16 = 1005;

/// Code reported when the stream ended without a close handshake.
const ABNORMAL_CLOSE_CODE: u16 = 1006;

// ============================================================================
// Types
// ============================================================================

/// Map of live links to their command channels.
type LinkMap = FxHashMap<LinkId, mpsc::UnboundedSender<LinkCommand>>;

/// Internal commands for a link task.
enum LinkCommand {
    /// Write a text frame.
    Send(String),
    /// Close the socket.
    Close { code: u16, reason: String },
}

// ============================================================================
// WsTransport
// ============================================================================

/// WebSocket transport backed by `tokio-tungstenite`.
///
/// Must be used from within a tokio runtime.
pub struct WsTransport {
    /// Live links (shared with link tasks for cleanup).
    links: Arc<Mutex<LinkMap>>,
    /// Where link tasks report to.
    notify_tx: NotificationSender,
    /// Handshake timeout.
    connect_timeout: Duration,
}

impl WsTransport {
    /// Creates a transport reporting to `notify_tx`.
    #[must_use]
    pub fn new(notify_tx: NotificationSender) -> Self {
        Self::with_connect_timeout(notify_tx, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Creates a transport with a custom handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(notify_tx: NotificationSender, connect_timeout: Duration) -> Self {
        Self {
            links: Arc::new(Mutex::new(LinkMap::default())),
            notify_tx,
            connect_timeout,
        }
    }

    /// Returns the number of links whose task is still running.
    #[inline]
    #[must_use]
    pub fn live_links(&self) -> usize {
        self.links.lock().len()
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &Url) -> Result<LinkId> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::transport(format!("no tokio runtime: {e}")))?;

        let link = LinkId::next();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.links.lock().insert(link, command_tx);

        debug!(%link, %url, "Opening link");

        runtime.spawn(run_link(
            LinkGuard {
                link,
                links: Arc::clone(&self.links),
            },
            url.clone(),
            command_rx,
            self.notify_tx.clone(),
            self.connect_timeout,
        ));

        Ok(link)
    }

    fn send(&mut self, link: LinkId, text: &str) -> Result<()> {
        let links = self.links.lock();
        let command_tx = links
            .get(&link)
            .ok_or_else(|| Error::transport(format!("{link} is not open")))?;

        command_tx
            .send(LinkCommand::Send(text.to_owned()))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn close(&mut self, link: LinkId, code: u16, reason: &str) {
        if let Some(command_tx) = self.links.lock().get(&link) {
            let _ = command_tx.send(LinkCommand::Close {
                code,
                reason: reason.to_owned(),
            });
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        // Dropping the senders ends every link task.
        self.links.lock().clear();
    }
}

// ============================================================================
// LinkGuard
// ============================================================================

/// Removes a link from the map when its task ends.
struct LinkGuard {
    link: LinkId,
    links: Arc<Mutex<LinkMap>>,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.links.lock().remove(&self.link);
        trace!(link = %self.link, "Link task ended");
    }
}

// ============================================================================
// Link Task
// ============================================================================

/// Connects and runs the event loop of one link.
async fn run_link(
    guard: LinkGuard,
    url: Url,
    mut command_rx: mpsc::UnboundedReceiver<LinkCommand>,
    notify_tx: NotificationSender,
    connect_timeout: Duration,
) {
    let link = guard.link;
    let notify = |event: TransportEvent| {
        let _ = notify_tx.send(TransportNotification::new(link, event));
    };

    // Connect phase
    let connect = timeout(connect_timeout, connect_async(url.as_str()));
    tokio::pin!(connect);

    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(Ok((stream, _response))) => break stream,
                Ok(Err(e)) => {
                    notify(TransportEvent::Failure { error: e.to_string() });
                    return;
                }
                Err(_) => {
                    notify(TransportEvent::Failure {
                        error: format!("connect timed out after {}ms", connect_timeout.as_millis()),
                    });
                    return;
                }
            },

            command = command_rx.recv() => match command {
                Some(LinkCommand::Send(_)) => {
                    warn!(%link, "Dropping frame sent before link opened");
                }
                Some(LinkCommand::Close { code, reason }) => {
                    debug!(%link, "Closed while connecting");
                    notify(TransportEvent::Closed { code, reason });
                    return;
                }
                None => return,
            },
        }
    };

    debug!(%link, %url, "Link open");
    notify(TransportEvent::Open);

    // Event loop
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut remote_close: Option<(u16, String)> = None;

    let terminal = loop {
        tokio::select! {
            message = ws_read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    notify(TransportEvent::Message(text.as_str().to_owned()));
                }

                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => notify(TransportEvent::Message(text)),
                    Err(e) => warn!(%link, error = %e, "Dropping non-UTF-8 binary frame"),
                },

                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((NO_STATUS_CODE, String::new()));
                    debug!(%link, code, %reason, "Relay closing link");
                    notify(TransportEvent::Closing { code, reason: reason.clone() });
                    remote_close = Some((code, reason));
                }

                // Ping, Pong and raw frames are handled by tungstenite
                Some(Ok(_)) => {}

                Some(Err(e)) => {
                    break match remote_close.take() {
                        Some((code, reason)) => TransportEvent::Closed { code, reason },
                        None => TransportEvent::Failure { error: e.to_string() },
                    };
                }

                None => {
                    let (code, reason) = remote_close
                        .take()
                        .unwrap_or((ABNORMAL_CLOSE_CODE, "stream ended".to_owned()));
                    break TransportEvent::Closed { code, reason };
                }
            },

            command = command_rx.recv() => match command {
                Some(LinkCommand::Send(text)) => {
                    if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                        break TransportEvent::Failure { error: e.to_string() };
                    }
                    trace!(%link, "Frame sent");
                }

                Some(LinkCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = ws_write.send(Message::Close(Some(frame))).await {
                        debug!(%link, error = %e, "Failed to send close frame");
                    }
                    break TransportEvent::Closed { code, reason };
                }

                None => {
                    let _ = ws_write.close().await;
                    break TransportEvent::Closed {
                        code: NORMAL_CLOSE_CODE,
                        reason: "transport dropped".to_owned(),
                    };
                }
            },
        }
    };

    debug!(%link, event = ?terminal, "Link finished");
    notify(terminal);
    drop(guard);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_outside_runtime_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);
        let url = Url::parse("ws://127.0.0.1:1").unwrap();

        let err = transport.open(&url).unwrap_err();
        assert!(err.is_transport_error());
        assert_eq!(transport.live_links(), 0);
    }

    #[test]
    fn test_send_unknown_link() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);

        let err = transport.send(LinkId::from_raw(u64::MAX), "[]").unwrap_err();
        assert!(err.is_transport_error());

        // Closing an unknown link is silent
        transport.close(LinkId::from_raw(u64::MAX), 1000, "bye");
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::with_connect_timeout(tx, Duration::from_secs(2));

        // Port 1 on localhost refuses connections
        let url = Url::parse("ws://127.0.0.1:1").unwrap();
        let link = transport.open(&url).unwrap();

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.link, link);
        assert!(matches!(notification.event, TransportEvent::Failure { .. }));
    }

    #[tokio::test]
    async fn test_connect_timeout_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept TCP but never answer the WebSocket upgrade
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::with_connect_timeout(tx, Duration::from_millis(50));
        let url = Url::parse(&format!("ws://{addr}")).unwrap();
        let link = transport.open(&url).unwrap();

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.link, link);
        match notification.event {
            TransportEvent::Failure { error } => assert!(error.contains("timed out"), "{error}"),
            other => panic!("expected Failure, got {other:?}"),
        }

        server.abort();
    }

    #[tokio::test]
    async fn test_close_while_connecting() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::with_connect_timeout(tx, Duration::from_secs(5));

        // Non-routable address keeps the handshake pending
        let url = Url::parse("ws://10.255.255.1:9").unwrap();
        let link = transport.open(&url).unwrap();
        transport.close(link, 1000, "Reconnecting");

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.link, link);
        assert!(notification.event.is_terminal());
    }
}

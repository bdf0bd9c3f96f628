//! Recording doubles for session tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use url::Url;

use crate::error::{Error, Result};
use crate::host::{AuthBridge, EventSink};
use crate::identifiers::LinkId;
use crate::transport::Transport;

/// Everything a [`FakeTransport`] was asked to do.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub opened: Vec<LinkId>,
    pub sent: Vec<(LinkId, String)>,
    pub closed: Vec<(LinkId, u16, String)>,
    pub fail_open: bool,
    pub fail_send: bool,
}

impl TransportLog {
    /// Links opened and not closed by the session.
    pub fn live(&self) -> Vec<LinkId> {
        self.opened
            .iter()
            .copied()
            .filter(|link| !self.closed.iter().any(|(closed, _, _)| closed == link))
            .collect()
    }

    /// Subscription ids of every REQ sent, in order.
    pub fn req_ids(&self) -> Vec<String> {
        self.sent
            .iter()
            .filter_map(|(_, text)| {
                let value: serde_json::Value = serde_json::from_str(text).ok()?;
                (value[0] == "REQ").then(|| value[1].as_str().unwrap_or_default().to_owned())
            })
            .collect()
    }
}

/// Transport that records calls instead of touching the network.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    pub log: Arc<Mutex<TransportLog>>,
}

impl Transport for FakeTransport {
    fn open(&mut self, _url: &Url) -> Result<LinkId> {
        let mut log = self.log.lock();
        if log.fail_open {
            return Err(Error::transport("open refused"));
        }
        let link = LinkId::next();
        log.opened.push(link);
        Ok(link)
    }

    fn send(&mut self, link: LinkId, text: &str) -> Result<()> {
        let mut log = self.log.lock();
        if log.fail_send {
            return Err(Error::transport("send refused"));
        }
        log.sent.push((link, text.to_owned()));
        Ok(())
    }

    fn close(&mut self, link: LinkId, code: u16, reason: &str) {
        self.log.lock().closed.push((link, code, reason.to_owned()));
    }
}

/// Sink with a switchable foreground flag and an activation counter.
#[derive(Debug, Default)]
pub struct CountingSink {
    pub foreground: AtomicBool,
    pub activations: AtomicUsize,
}

impl CountingSink {
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

impl EventSink for CountingSink {
    fn should_suppress_activation(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }

    fn activate(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Bridge that remembers the challenges it was asked to sign.
#[derive(Debug, Default)]
pub struct RecordingBridge {
    pub requests: Mutex<Vec<(String, String)>>,
}

impl AuthBridge for RecordingBridge {
    fn request_auth(&self, relay: &str, challenge: &str) {
        self.requests.lock().push((relay.to_owned(), challenge.to_owned()));
    }
}

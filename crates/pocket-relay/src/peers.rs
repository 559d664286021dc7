//! Peer links
//!
//! `PeerSet` is the table of currently open outbound links to sibling relays.
//! `PeerLinkManager` keeps one link per configured URL alive: dial, serve the
//! link until it drops, wait out the reconnect delay, dial again. There is no
//! retry limit; a peer that is down is retried for as long as the relay runs.
//!
//! Peer links are trusted by configuration only. They never go through the
//! challenge flow and anything they send as a pocket is routed.

use crate::config::ReconnectConfig;
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRole};
use crate::relay::RelayState;
use crate::transport::{drive_connection, websocket_config};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async_with_config;
use tracing::{debug, info, warn};

/// An open outbound link.
#[derive(Debug, Clone)]
pub struct PeerLink {
    /// Configured peer URL
    pub url: String,
    /// Sending side of the link
    pub handle: ConnectionHandle,
}

/// Currently open peer links, keyed by connection.
#[derive(Debug, Default)]
pub struct PeerSet {
    links: Mutex<BTreeMap<ConnectionId, PeerLink>>,
}

impl PeerSet {
    /// Create an empty peer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened link.
    pub fn add(&self, url: impl Into<String>, handle: ConnectionHandle) {
        let link = PeerLink {
            url: url.into(),
            handle,
        };
        self.links.lock().insert(link.handle.id(), link);
    }

    /// Forget a link; returns it if it was present.
    pub fn remove(&self, conn: ConnectionId) -> Option<PeerLink> {
        self.links.lock().remove(&conn)
    }

    /// Whether `conn` is a registered peer link.
    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.links.lock().contains_key(&conn)
    }

    /// Handles of every open link other than `except`.
    pub fn handles_except(&self, except: Option<ConnectionId>) -> Vec<ConnectionHandle> {
        self.links
            .lock()
            .values()
            .filter(|link| Some(link.handle.id()) != except && link.handle.is_open())
            .map(|link| link.handle.clone())
            .collect()
    }

    /// URLs with an open link.
    pub fn connected_urls(&self) -> Vec<String> {
        self.links
            .lock()
            .values()
            .map(|link| link.url.clone())
            .collect()
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    /// No links.
    pub fn is_empty(&self) -> bool {
        self.links.lock().is_empty()
    }
}

/// Dials configured peers and redials them after failure.
pub struct PeerLinkManager {
    state: Arc<RelayState>,
    policy: ReconnectConfig,
}

impl PeerLinkManager {
    /// Manager using the relay's configured reconnect policy.
    pub fn new(state: Arc<RelayState>) -> Self {
        let policy = state.config().reconnect.clone();
        Self { state, policy }
    }

    /// Spawn one link task per configured peer URL.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let urls = self.state.config().peers.clone();
        urls.into_iter()
            .map(|url| {
                let state = self.state.clone();
                let policy = self.policy.clone();
                tokio::spawn(maintain_link(state, url, policy))
            })
            .collect()
    }
}

async fn maintain_link(state: Arc<RelayState>, url: String, policy: ReconnectConfig) {
    let mut attempt: u32 = 0;

    loop {
        debug!(peer = %url, attempt, "Dialling peer");
        let config = websocket_config(state.config().max_frame_bytes);
        match connect_async_with_config(url.as_str(), Some(config), false).await {
            Ok((ws, _response)) => {
                attempt = 0;
                let (handle, outbound) =
                    ConnectionHandle::with_capacity(state.config().outbound_queue_frames);
                state.peers().add(url.clone(), handle.clone());
                info!(peer = %url, conn = %handle.id(), "Connected to peer");

                drive_connection(state.clone(), ws, handle, outbound, ConnectionRole::Peer).await;

                warn!(peer = %url, "Lost connection to peer, reconnecting");
            }
            Err(e) => {
                warn!(peer = %url, error = %e, "Peer connect failed");
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = policy.delay_for_attempt(attempt);
        debug!(peer = %url, delay_ms = delay.as_millis() as u64, "Scheduling peer reconnect");
        sleep(delay).await;
    }
}

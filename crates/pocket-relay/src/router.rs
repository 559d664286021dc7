//! Flood router
//!
//! Every pocket that passes duplicate suppression is delivered verbatim to
//! each local connection bound to one of its receivers and to every open
//! peer link except the one it arrived on. There is no routing table; the
//! suppressor at each hop is what stops the flood.

use crate::connection::ConnectionId;
use crate::dedup::SeenPockets;
use crate::peers::PeerSet;
use crate::registry::IdentityRegistry;
use crate::wire::{IdentityKey, Pocket, ServerMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// What the router did with a pocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No usable id, or unencodable; dropped
    Ignored,
    /// Already routed within the suppression window
    Duplicate,
    /// Routed; counts are frames actually queued
    Routed {
        /// Local receivers reached
        local: usize,
        /// Peer links reached
        peers: usize,
    },
}

/// Running totals, for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Pockets routed
    pub routed: u64,
    /// Pockets discarded as duplicates
    pub duplicates: u64,
}

/// Delivers pockets locally and floods them to peers.
#[derive(Debug)]
pub struct FloodRouter {
    registry: Arc<IdentityRegistry>,
    peers: Arc<PeerSet>,
    seen: Mutex<SeenPockets>,
    routed: AtomicU64,
    duplicates: AtomicU64,
}

impl FloodRouter {
    /// Create a router with a suppression window of `seen_ttl`.
    pub fn new(registry: Arc<IdentityRegistry>, peers: Arc<PeerSet>, seen_ttl: Duration) -> Self {
        Self {
            registry,
            peers,
            seen: Mutex::new(SeenPockets::new(seen_ttl)),
            routed: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Route `pocket`. `from_peer` is the peer link it arrived on, `None`
    /// when it came from a local connection.
    pub fn route(&self, pocket: Pocket, from_peer: Option<ConnectionId>) -> RouteOutcome {
        self.route_at(pocket, from_peer, Instant::now())
    }

    /// `route` with an explicit clock reading.
    pub fn route_at(
        &self,
        pocket: Pocket,
        from_peer: Option<ConnectionId>,
        now: Instant,
    ) -> RouteOutcome {
        let Some(id) = pocket.id() else {
            trace!("Pocket without id, ignoring");
            return RouteOutcome::Ignored;
        };

        if !self.seen.lock().check_and_mark_at(&id, now) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            trace!(%id, "Duplicate pocket, dropping");
            return RouteOutcome::Duplicate;
        }

        let receivers: Vec<IdentityKey> = pocket.receivers().collect();
        let frame: Arc<str> = match (ServerMessage::Pocket { pocket }).to_frame() {
            Ok(frame) => frame.into(),
            Err(e) => {
                warn!(%id, error = %e, "Failed to encode pocket");
                return RouteOutcome::Ignored;
            }
        };

        let mut local = 0;
        for receiver in &receivers {
            match self.registry.lookup(receiver) {
                Some(conn) if conn.is_open() => {
                    if conn.send_frame(frame.clone()) {
                        local += 1;
                    }
                }
                _ => trace!(%id, receiver = %receiver.short(), "Receiver not connected here"),
            }
        }

        let mut peers = 0;
        for link in self.peers.handles_except(from_peer) {
            if link.send_frame(frame.clone()) {
                peers += 1;
            }
        }

        self.routed.fetch_add(1, Ordering::Relaxed);
        debug!(
            %id,
            receivers = receivers.len(),
            local,
            peers,
            from_peer = from_peer.map(ConnectionId::value),
            "Routed pocket"
        );

        RouteOutcome::Routed { local, peers }
    }

    /// Forget pocket ids whose window has passed.
    pub fn sweep_seen(&self) -> usize {
        self.seen.lock().sweep()
    }

    /// Number of pocket ids currently remembered.
    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Routing totals so far.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            routed: self.routed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

//! Connection handles
//!
//! A `ConnectionHandle` is the cloneable sending side of one transport
//! connection. Shared tables (registry, peer set) store handles, never
//! sockets; delivering a frame just pushes it onto the connection's queue,
//! which a dedicated writer task drains. Nothing in the relay ever performs
//! socket I/O while holding a lock.
//!
//! Queues are bounded. A connection whose writer falls behind loses frames
//! rather than growing without limit; delivery is best effort throughout.

use crate::wire::ServerMessage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

/// Queue length used when none is configured.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for logging.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a connection is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Accepted, not (yet) registered
    Unauthenticated,
    /// Accepted and proved ownership of at least one identity
    Client,
    /// Dialled by this node to a configured peer relay
    Peer,
}

/// Instruction for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Send one text frame
    Frame(Arc<str>),
    /// Flush what is queued, send a close frame, stop
    Close,
}

/// Cloneable sending side of a connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl ConnectionHandle {
    /// Create a handle and the queue its writer task drains.
    pub fn new() -> (Self, mpsc::Receiver<Outbound>) {
        Self::with_capacity(DEFAULT_OUTBOUND_QUEUE)
    }

    /// Like `new`, holding at most `capacity` queued instructions.
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::next(),
            tx,
        };
        (handle, rx)
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the writer side is still accepting frames.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue an already-encoded frame. Returns false if the frame was
    /// dropped because the connection is gone or its queue is full.
    pub fn send_frame(&self, frame: Arc<str>) -> bool {
        match self.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(conn = %self.id, "Outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!(conn = %self.id, "Dropping frame for closed connection");
                false
            }
        }
    }

    /// Encode and queue a message.
    pub fn send(&self, message: &ServerMessage) -> bool {
        match message.to_frame() {
            Ok(frame) => self.send_frame(frame.into()),
            Err(e) => {
                trace!(conn = %self.id, error = %e, "Failed to encode frame");
                false
            }
        }
    }

    /// Ask the writer to close after flushing queued frames. A full queue
    /// swallows the request; the connection driver's close deadline applies.
    pub fn close(&self) {
        let _ = self.tx.try_send(Outbound::Close);
    }

    /// Two handles refer to the same connection.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let (a, _rx_a) = ConnectionHandle::new();
        let (b, _rx_b) = ConnectionHandle::new();
        assert_ne!(a.id(), b.id());
        assert!(a.same_connection(&a.clone()));
        assert!(!a.same_connection(&b));
    }

    #[test]
    fn frames_are_queued_in_order() {
        let (handle, mut rx) = ConnectionHandle::new();
        assert!(handle.send_frame("one".into()));
        assert!(handle.send(&ServerMessage::Error {
            message: "two".into()
        }));
        handle.close();

        assert_eq!(rx.try_recv().unwrap(), Outbound::Frame("one".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Frame(r#"{"type":"error","message":"two"}"#.into())
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn dropped_receiver_marks_handle_closed() {
        let (handle, rx) = ConnectionHandle::new();
        assert!(handle.is_open());
        drop(rx);
        assert!(!handle.is_open());
        assert!(!handle.send_frame("late".into()));
    }

    #[test]
    fn full_queue_drops_frames_until_drained() {
        let (handle, mut rx) = ConnectionHandle::with_capacity(2);
        assert!(handle.send_frame("one".into()));
        assert!(handle.send_frame("two".into()));
        assert!(!handle.send_frame("three".into()));
        assert!(handle.is_open());

        assert_eq!(rx.try_recv().unwrap(), Outbound::Frame("one".into()));
        assert!(handle.send_frame("four".into()));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Frame("two".into()));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Frame("four".into()));
        assert!(rx.try_recv().is_err());
    }
}

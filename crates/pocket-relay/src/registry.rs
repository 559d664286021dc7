//! Identity registry: who is online on this node.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::wire::IdentityKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Maps each identity to at most one live connection.
///
/// A later registration of the same identity replaces the binding without
/// touching the previous connection; it simply stops receiving pockets for
/// that identity.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    bindings: Mutex<HashMap<IdentityKey, ConnectionHandle>>,
}

impl IdentityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `connection`, returning the connection it replaced.
    pub fn bind(
        &self,
        identity: IdentityKey,
        connection: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let conn = connection.id();
        let previous = self.bindings.lock().insert(identity.clone(), connection);

        if let Some(prev) = previous.as_ref().filter(|prev| prev.id() != conn) {
            debug!(
                identity = %identity.short(),
                previous = %prev.id(),
                %conn,
                "Identity re-registered on a new connection"
            );
        }

        previous
    }

    /// Connection currently bound to `identity`.
    pub fn lookup(&self, identity: &IdentityKey) -> Option<ConnectionHandle> {
        self.bindings.lock().get(identity).cloned()
    }

    /// Remove the binding only if it still points at `connection`.
    ///
    /// Returns true when an entry was removed.
    pub fn unbind(&self, identity: &IdentityKey, connection: ConnectionId) -> bool {
        let mut bindings = self.bindings.lock();
        match bindings.get(identity) {
            Some(bound) if bound.id() == connection => {
                bindings.remove(identity);
                true
            }
            _ => false,
        }
    }

    /// Number of bound identities.
    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    /// No identities bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_bound_connection() {
        let registry = IdentityRegistry::new();
        let (conn, _rx) = ConnectionHandle::new();
        let key = IdentityKey::new("PK1");

        assert!(registry.bind(key.clone(), conn.clone()).is_none());
        let found = registry.lookup(&key).unwrap();
        assert!(found.same_connection(&conn));
        assert!(registry.lookup(&IdentityKey::new("PK2")).is_none());
    }

    #[test]
    fn rebinding_supersedes_previous_connection() {
        let registry = IdentityRegistry::new();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();
        let key = IdentityKey::new("PK1");

        registry.bind(key.clone(), first.clone());
        let replaced = registry.bind(key.clone(), second.clone()).unwrap();

        assert!(replaced.same_connection(&first));
        assert!(registry.lookup(&key).unwrap().same_connection(&second));
        assert!(first.is_open());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_unbind_is_a_noop() {
        let registry = IdentityRegistry::new();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();
        let key = IdentityKey::new("PK1");

        registry.bind(key.clone(), first.clone());
        registry.bind(key.clone(), second.clone());

        assert!(!registry.unbind(&key, first.id()));
        assert!(registry.lookup(&key).unwrap().same_connection(&second));

        assert!(registry.unbind(&key, second.id()));
        assert!(registry.is_empty());
    }
}

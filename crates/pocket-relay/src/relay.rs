//! Relay state and per-frame dispatch
//!
//! `RelayState` owns every process-wide table: the identity registry, the
//! pending challenges, the peer set and the router's suppression cache. Each
//! table has its own lock and no lock is ever held across an await point, so
//! any connection task can call into the state directly.

use crate::challenge::{ChallengeAuthenticator, RegistrationOutcome};
use crate::config::RelayConfig;
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRole};
use crate::peers::PeerSet;
use crate::registry::IdentityRegistry;
use crate::router::FloodRouter;
use crate::wire::{decode_frame, ClientMessage, IdentityKey, ServerMessage};
use std::sync::Arc;
use tracing::{debug, trace};

/// Whether the connection stays open after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep reading
    Continue,
    /// Flush and close
    Close,
}

/// Per-connection state owned by the connection's reader.
#[derive(Debug)]
pub struct ConnectionSession {
    handle: ConnectionHandle,
    role: ConnectionRole,
    identities: Vec<IdentityKey>,
}

impl ConnectionSession {
    /// Session for a connection starting in `role`.
    pub fn new(handle: ConnectionHandle, role: ConnectionRole) -> Self {
        Self {
            handle,
            role,
            identities: Vec::new(),
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Sending side.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Current role.
    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Identities this connection has registered.
    pub fn identities(&self) -> &[IdentityKey] {
        &self.identities
    }

    /// The peer link to exclude when flooding what this connection sends.
    fn origin_peer(&self) -> Option<ConnectionId> {
        (self.role == ConnectionRole::Peer).then(|| self.id())
    }
}

/// Shared relay state.
#[derive(Debug)]
pub struct RelayState {
    config: RelayConfig,
    registry: Arc<IdentityRegistry>,
    authenticator: ChallengeAuthenticator,
    peers: Arc<PeerSet>,
    router: FloodRouter,
}

impl RelayState {
    /// Build empty state for `config`.
    pub fn new(config: RelayConfig) -> Arc<Self> {
        let registry = Arc::new(IdentityRegistry::new());
        let peers = Arc::new(PeerSet::new());
        let authenticator = ChallengeAuthenticator::new(registry.clone());
        let router = FloodRouter::new(registry.clone(), peers.clone(), config.seen_ttl());

        Arc::new(Self {
            config,
            registry,
            authenticator,
            peers,
            router,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Identity registry.
    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    /// Challenge authenticator.
    pub fn authenticator(&self) -> &ChallengeAuthenticator {
        &self.authenticator
    }

    /// Open peer links.
    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Flood router.
    pub fn router(&self) -> &FloodRouter {
        &self.router
    }

    /// Decode and handle one raw frame. Undecodable frames are ignored.
    pub fn handle_frame(&self, session: &mut ConnectionSession, frame: &[u8]) -> Disposition {
        match decode_frame(frame, self.config.max_frame_bytes) {
            Ok(message) => self.handle_message(session, message),
            Err(e) => {
                trace!(conn = %session.id(), error = %e, "Ignoring malformed frame");
                Disposition::Continue
            }
        }
    }

    /// Handle one decoded message.
    pub fn handle_message(
        &self,
        session: &mut ConnectionSession,
        message: ClientMessage,
    ) -> Disposition {
        let conn = session.id();

        match (session.role, message) {
            (ConnectionRole::Peer, ClientMessage::Pocket { pocket }) => {
                self.router.route(pocket, session.origin_peer());
                Disposition::Continue
            }
            (ConnectionRole::Peer, _) => {
                trace!(%conn, "Ignoring non-pocket frame from peer");
                Disposition::Continue
            }
            (_, ClientMessage::RegisterRequest) => {
                let challenge = self.authenticator.issue(conn);
                session.handle.send(&ServerMessage::Challenge {
                    challenge: challenge.as_str().to_owned(),
                });
                Disposition::Continue
            }
            (
                _,
                ClientMessage::RegisterResponse {
                    public_key,
                    signature,
                },
            ) => match self
                .authenticator
                .respond(&session.handle, &public_key, &signature)
            {
                RegistrationOutcome::NoPendingChallenge => Disposition::Continue,
                RegistrationOutcome::Registered(identity) => {
                    session.role = ConnectionRole::Client;
                    if !session.identities.contains(&identity) {
                        session.identities.push(identity.clone());
                    }
                    session.handle.send(&ServerMessage::Registered {
                        public_key: identity,
                    });
                    Disposition::Continue
                }
                RegistrationOutcome::Rejected(reason) => {
                    session.handle.send(&ServerMessage::Error {
                        message: reason.to_string(),
                    });
                    Disposition::Close
                }
            },
            (_, ClientMessage::Pocket { pocket }) => {
                self.router.route(pocket, session.origin_peer());
                Disposition::Continue
            }
        }
    }

    /// Release everything tied to a closing connection.
    pub fn teardown(&self, session: &ConnectionSession) {
        let conn = session.id();
        self.authenticator.discard(conn);

        let mut unbound = 0;
        for identity in &session.identities {
            if self.registry.unbind(identity, conn) {
                unbound += 1;
            }
        }

        let was_peer = self.peers.remove(conn).is_some();
        debug!(%conn, unbound, was_peer, "Connection closed");
    }
}

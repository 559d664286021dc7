//! Pocket relay node
//!
//! A relay for a public-key-addressed message network. Clients prove they
//! hold an identity's private key through a challenge-response handshake and
//! are then reachable by that key. Pockets (signed messages) submitted by any
//! connection are delivered to local receivers and flooded to sibling relays,
//! with a time-bounded seen-id cache stopping the flood from looping.
//!
//! The relay never inspects or re-signs pocket contents.

pub mod challenge;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod error;
pub mod peers;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
pub mod transport;
pub mod wire;

pub use challenge::{Challenge, ChallengeAuthenticator, RegistrationOutcome};
pub use config::{ReconnectConfig, RelayConfig};
pub use connection::{ConnectionHandle, ConnectionId, ConnectionRole};
pub use dedup::SeenPockets;
pub use error::{AuthError, RelayError, RelayResult};
pub use peers::{PeerLinkManager, PeerSet};
pub use registry::IdentityRegistry;
pub use relay::{ConnectionSession, Disposition, RelayState};
pub use router::{FloodRouter, RouteOutcome, RouterStats};
pub use server::{RelayServer, RunningRelay};
pub use wire::{ClientMessage, IdentityKey, Pocket, PocketId, ServerMessage};

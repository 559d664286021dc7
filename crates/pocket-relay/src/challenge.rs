//! Challenge-response registration
//!
//! A connection proves it holds the private key for an identity by signing a
//! fresh random challenge. The challenge travels as a hex string and the
//! client signs the UTF-8 bytes of that string with ECDSA P-256 / SHA-256.
//! Public keys arrive as base64 SPKI; signatures as hex, either the
//! fixed-width `r || s` form WebCrypto produces or ASN.1 DER.
//!
//! Each connection has at most one pending challenge. A new request replaces
//! it; the first response consumes it whatever the outcome, so a signature
//! can never be replayed against a later challenge.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::AuthError;
use crate::registry::IdentityRegistry;
use crate::wire::IdentityKey;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entropy per challenge.
pub const CHALLENGE_BYTES: usize = 32;

/// Single-use registration nonce, hex encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge(String);

impl Challenge {
    /// Draw a fresh challenge from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CHALLENGE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Hex text sent to the client.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes the client is expected to sign.
    pub fn signed_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Challenge").field(&"<redacted>").finish()
    }
}

/// Decode the base64 SPKI public key.
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey, AuthError> {
    let der = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::MalformedPublicKey)?;
    VerifyingKey::from_public_key_der(&der).map_err(|_| AuthError::MalformedPublicKey)
}

/// Decode a hex signature in fixed-width or DER form.
pub fn decode_signature(encoded: &str) -> Result<Signature, AuthError> {
    let bytes = hex::decode(encoded.trim()).map_err(|_| AuthError::MalformedSignature)?;
    let parsed = if bytes.len() == 64 {
        Signature::from_slice(&bytes)
    } else {
        Signature::from_der(&bytes)
    };
    parsed.map_err(|_| AuthError::MalformedSignature)
}

/// Check that `signature` is `public_key`'s signature over `challenge`.
pub fn verify_registration(
    challenge: &Challenge,
    public_key: &str,
    signature: &str,
) -> Result<IdentityKey, AuthError> {
    let verifying_key = decode_public_key(public_key)?;
    let signature = decode_signature(signature)?;

    verifying_key
        .verify(challenge.signed_bytes(), &signature)
        .map_err(|_| AuthError::InvalidSignature)?;

    Ok(IdentityKey::new(public_key))
}

/// Result of handling a `registerResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// No challenge was pending; nothing changed
    NoPendingChallenge,
    /// Identity bound to the connection
    Registered(IdentityKey),
    /// Proof rejected; the caller must report and close
    Rejected(AuthError),
}

/// Drives connections from unauthenticated to registered.
#[derive(Debug)]
pub struct ChallengeAuthenticator {
    pending: Mutex<HashMap<ConnectionId, Challenge>>,
    registry: Arc<IdentityRegistry>,
}

impl ChallengeAuthenticator {
    /// Create an authenticator that binds into `registry`.
    pub fn new(registry: Arc<IdentityRegistry>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// Issue a challenge for `conn`, replacing any pending one.
    pub fn issue(&self, conn: ConnectionId) -> Challenge {
        let challenge = Challenge::generate();
        let replaced = self.pending.lock().insert(conn, challenge.clone());
        debug!(%conn, replaced = replaced.is_some(), "Issued registration challenge");
        challenge
    }

    /// Consume the pending challenge for `connection` and verify the proof.
    ///
    /// On success the identity is bound to `connection` in the registry.
    pub fn respond(
        &self,
        connection: &ConnectionHandle,
        public_key: &str,
        signature: &str,
    ) -> RegistrationOutcome {
        let conn = connection.id();
        let Some(challenge) = self.pending.lock().remove(&conn) else {
            debug!(%conn, "Registration response without pending challenge");
            return RegistrationOutcome::NoPendingChallenge;
        };

        match verify_registration(&challenge, public_key, signature) {
            Ok(identity) => {
                self.registry.bind(identity.clone(), connection.clone());
                info!(%conn, identity = %identity.short(), "Registered");
                RegistrationOutcome::Registered(identity)
            }
            Err(reason) => {
                warn!(%conn, %reason, "Registration rejected");
                RegistrationOutcome::Rejected(reason)
            }
        }
    }

    /// Drop the pending challenge for a closing connection.
    pub fn discard(&self, conn: ConnectionId) {
        self.pending.lock().remove(&conn);
    }

    /// Whether `conn` has a challenge outstanding.
    pub fn has_pending(&self, conn: ConnectionId) -> bool {
        self.pending.lock().contains_key(&conn)
    }

    /// Number of outstanding challenges.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

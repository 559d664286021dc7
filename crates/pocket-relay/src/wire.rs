//! Wire format
//!
//! One JSON object per WebSocket frame, discriminated by a `type` field.
//! Clients and peer relays speak the same shapes; a peer link simply never
//! sends the registration messages.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A public key as it appears on the wire: base64 of the exported SPKI
/// document. Compared byte-for-byte; the registry never re-encodes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Wrap the base64 SPKI text.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The base64 SPKI text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(20)
            .map_or(self.0.len(), |(idx, _)| idx);
        &self.0[..end]
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Suppression key derived from a pocket's `id` member.
///
/// Any JSON value may serve as an id. The key is its compact JSON text, so
/// the string `"42"` and the number `42` stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PocketId(String);

impl PocketId {
    /// Key for a string id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(Value::String(id.into()).to_string())
    }

    /// Key for an arbitrary id value. Missing-like values (`null`, `false`,
    /// `0`, `""`) carry no id and yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let present = match value {
            Value::Null => false,
            Value::Bool(flag) => *flag,
            Value::Number(n) => !matches!(n.as_f64(), Some(f) if f == 0.0 || f.is_nan()),
            Value::String(text) => !text.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        };
        present.then(|| Self(value.to_string()))
    }

    /// Canonical key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PocketId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The routed message: a JSON object carried through member for member.
///
/// Only `id` and `receiverPKs` are ever read. Members are never dropped,
/// rewritten or reordered, `null`s included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pocket {
    members: Map<String, Value>,
}

impl Pocket {
    /// Minimal pocket addressed to `receivers`.
    pub fn new(id: impl Into<String>, receivers: impl IntoIterator<Item = IdentityKey>) -> Self {
        let receivers = receivers
            .into_iter()
            .map(|key| Value::String(key.0))
            .collect();
        let mut members = Map::new();
        members.insert("id".to_owned(), Value::String(id.into()));
        members.insert("receiverPKs".to_owned(), Value::Array(receivers));
        Self { members }
    }

    /// Wrap an already decoded object.
    pub fn from_members(members: Map<String, Value>) -> Self {
        Self { members }
    }

    /// Suppression key, if the pocket has a usable `id`.
    pub fn id(&self) -> Option<PocketId> {
        self.members.get("id").and_then(PocketId::from_value)
    }

    /// String entries of `receiverPKs`, in order. A missing or non-array
    /// member means no local receivers; non-string entries match nobody.
    pub fn receivers(&self) -> impl Iterator<Item = IdentityKey> + '_ {
        self.members
            .get("receiverPKs")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(IdentityKey::new)
    }

    /// Any member, as sent.
    pub fn get(&self, member: &str) -> Option<&Value> {
        self.members.get(member)
    }

    /// All members, as sent.
    pub fn members(&self) -> &Map<String, Value> {
        &self.members
    }
}

/// Frames the relay consumes, from clients or peer relays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Ask for a fresh challenge
    RegisterRequest,
    /// Prove key possession by signing the pending challenge
    RegisterResponse {
        /// Base64 SPKI public key
        #[serde(rename = "publicKey", default)]
        public_key: String,
        /// Hex-encoded ECDSA signature
        #[serde(default)]
        signature: String,
    },
    /// Submit a pocket for routing
    Pocket {
        /// The pocket
        pocket: Pocket,
    },
}

/// Frames the relay emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Challenge to sign, hex encoded
    Challenge {
        /// Hex nonce
        challenge: String,
    },
    /// Registration accepted
    Registered {
        /// The key now bound to this connection
        #[serde(rename = "publicKey")]
        public_key: IdentityKey,
    },
    /// Registration rejected; the connection closes after this frame
    Error {
        /// Human-readable reason
        message: String,
    },
    /// Routed pocket
    Pocket {
        /// The pocket, verbatim
        pocket: Pocket,
    },
}

impl ServerMessage {
    /// Encode as a single JSON frame.
    pub fn to_frame(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode one inbound frame, enforcing the size cap first.
pub fn decode_frame(frame: &[u8], max_frame_bytes: usize) -> RelayResult<ClientMessage> {
    if frame.len() > max_frame_bytes {
        return Err(RelayError::FrameTooLarge {
            size: frame.len(),
            max: max_frame_bytes,
        });
    }
    Ok(serde_json::from_slice(frame)?)
}

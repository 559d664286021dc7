//! Relay error types
//!
//! `RelayError` covers the failures that can reach a caller of the relay API
//! (startup, configuration, transport). Per-connection protocol problems never
//! surface here; they are logged and the connection is either left open or
//! closed. `AuthError` is the rejection reason for a registration attempt and
//! its `Display` text is what the client receives in the `error` frame.

use thiserror::Error;

/// Result alias used throughout the relay crate.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors surfaced by relay startup and transport plumbing.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Socket level failure (bind, accept, address lookup).
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// WebSocket handshake or framing failure.
    #[error("WebSocket error: {source}")]
    WebSocket {
        /// The underlying tungstenite error
        #[from]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// Frame could not be encoded or decoded as JSON.
    #[error("Codec error: {source}")]
    Codec {
        /// The underlying serde_json error
        #[from]
        source: serde_json::Error,
    },

    /// Inbound frame exceeds the configured cap.
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Received frame size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Configuration file could not be parsed.
    #[error("Config parse error: {source}")]
    ConfigParse {
        /// The underlying toml error
        #[from]
        source: toml::de::Error,
    },

    /// Configuration value is out of range or malformed.
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

impl RelayError {
    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Why a registration response was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Public key is not base64 SPKI for a P-256 key.
    #[error("Malformed public key")]
    MalformedPublicKey,

    /// Signature is not hex, or not a P-256 ECDSA signature encoding.
    #[error("Malformed signature")]
    MalformedSignature,

    /// Signature does not verify over the pending challenge.
    #[error("Invalid signature")]
    InvalidSignature,
}

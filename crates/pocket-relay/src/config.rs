//! Relay configuration
//!
//! Millisecond integer fields keep the TOML form flat and readable; the
//! accessor methods hand out `Duration`s to the runtime.

use crate::connection::DEFAULT_OUTBOUND_QUEUE;
use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default suppression window: 5 minutes.
pub const DEFAULT_SEEN_TTL_MS: u64 = 5 * 60 * 1000;

/// Default delay before re-dialling a dropped peer.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;

/// Configuration for peer reconnection behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub base_delay_ms: u64,
    /// Backoff multiplier (1.0 keeps the delay fixed)
    pub multiplier: f64,
    /// Maximum delay between attempts
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            multiplier: 1.0,
            max_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl ReconnectConfig {
    /// Fixed delay between every attempt.
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            base_delay_ms: ms,
            multiplier: 1.0,
            max_delay_ms: ms,
        }
    }

    /// Delay before the given attempt (1-based, counted since the last
    /// successful connection).
    pub fn delay_for_attempt(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.base_delay_ms as f64 * self.multiplier.powi(exponent);

        Duration::from_millis((delay as u64).min(self.max_delay_ms))
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to
    pub listen_addr: SocketAddr,
    /// Peer relay URLs to dial, in order
    pub peers: Vec<String>,
    /// How long a pocket id is remembered
    pub seen_ttl_ms: u64,
    /// How often expired pocket ids are swept
    pub sweep_interval_ms: u64,
    /// Inbound messages above this size close the connection
    pub max_frame_bytes: usize,
    /// Frames queued per connection before further frames are dropped
    pub outbound_queue_frames: usize,
    /// Peer reconnect policy
    pub reconnect: ReconnectConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            peers: Vec::new(),
            seen_ttl_ms: DEFAULT_SEEN_TTL_MS,
            sweep_interval_ms: 30_000,
            max_frame_bytes: 1024 * 1024, // 1MB
            outbound_queue_frames: DEFAULT_OUTBOUND_QUEUE,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(source: &str) -> RelayResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> RelayResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Replace the listen port, keeping the bind address.
    pub fn with_port(mut self, port: u16) -> Self {
        self.listen_addr.set_port(port);
        self
    }

    /// Replace the peer list.
    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peers = peers.into_iter().map(Into::into).collect();
        self
    }

    /// Suppression window.
    pub fn seen_ttl(&self) -> Duration {
        Duration::from_millis(self.seen_ttl_ms)
    }

    /// Suppression sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Check value ranges and peer URL shape.
    pub fn validate(&self) -> RelayResult<()> {
        if self.seen_ttl_ms == 0 {
            return Err(RelayError::invalid_config("seen_ttl_ms", "must be non-zero"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(RelayError::invalid_config(
                "sweep_interval_ms",
                "must be non-zero",
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(RelayError::invalid_config(
                "max_frame_bytes",
                "must be non-zero",
            ));
        }
        if self.outbound_queue_frames == 0 {
            return Err(RelayError::invalid_config(
                "outbound_queue_frames",
                "must be non-zero",
            ));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(RelayError::invalid_config(
                "reconnect.base_delay_ms",
                "must be non-zero",
            ));
        }
        if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
            return Err(RelayError::invalid_config(
                "reconnect.multiplier",
                "must be at least 1.0",
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(RelayError::invalid_config(
                "reconnect.max_delay_ms",
                "must not be below base_delay_ms",
            ));
        }

        for peer in &self.peers {
            let url = Url::parse(peer)
                .map_err(|e| RelayError::invalid_config("peers", format!("{peer}: {e}")))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(RelayError::invalid_config(
                    "peers",
                    format!("{peer}: scheme must be ws or wss"),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_documented_values() {
        let config = RelayConfig::default();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.seen_ttl(), Duration::from_secs(300));
        assert_eq!(config.reconnect.delay_for_attempt(1), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = ReconnectConfig::default();
        for attempt in [1, 2, 10, 1000] {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_secs(3));
        }
    }

    #[test]
    fn exponential_policy_is_capped() {
        let policy = ReconnectConfig {
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RelayConfig::from_toml_str(
            r#"
            listen_addr = "127.0.0.1:9000"
            peers = ["ws://relay-b:8080"]

            [reconnect]
            base_delay_ms = 500
            max_delay_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.peers, vec!["ws://relay-b:8080".to_string()]);
        assert_eq!(config.seen_ttl_ms, DEFAULT_SEEN_TTL_MS);
        assert_eq!(config.reconnect.multiplier, 1.0);
        assert_eq!(
            config.reconnect.delay_for_attempt(4),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn rejects_non_websocket_peer() {
        let config = RelayConfig::default().with_peers(["http://relay-b:8080"]);
        assert_matches!(
            config.validate(),
            Err(RelayError::InvalidConfig { field, .. }) if field == "peers"
        );
    }

    #[test]
    fn rejects_zero_ttl() {
        let config = RelayConfig {
            seen_ttl_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_outbound_queue() {
        let config = RelayConfig {
            outbound_queue_frames: 0,
            ..Default::default()
        };
        assert_matches!(
            config.validate(),
            Err(RelayError::InvalidConfig { field, .. }) if field == "outbound_queue_frames"
        );
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let config = RelayConfig {
            reconnect: ReconnectConfig {
                base_delay_ms: 1_000,
                multiplier: 0.5,
                max_delay_ms: 1_000,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "seen_ttl_ms = 1000\n").unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.seen_ttl(), Duration::from_secs(1));
    }

    #[test]
    fn with_port_keeps_host() {
        let config = RelayConfig::default().with_port(9999);
        assert_eq!(config.listen_addr.ip(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(config.listen_addr.port(), 9999);
    }
}

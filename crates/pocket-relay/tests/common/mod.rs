//! Shared helpers for relay integration tests.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::{SinkExt, StreamExt};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::pkcs8::EncodePublicKey;
use pocket_relay::{ReconnectConfig, RelayConfig, RelayServer, RunningRelay};
use rand::rngs::OsRng;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

/// Client keypair, exported the way a browser client exports it.
pub struct TestIdentity {
    signing_key: SigningKey,
    pub public_key: String,
}

impl TestIdentity {
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let der = signing_key
            .verifying_key()
            .to_public_key_der()
            .expect("SPKI export");
        Self {
            signing_key,
            public_key: STANDARD.encode(der.as_bytes()),
        }
    }

    /// Fixed-width hex signature over the challenge text.
    pub fn sign(&self, challenge: &str) -> String {
        let signature: Signature = self.signing_key.sign(challenge.as_bytes());
        hex::encode(signature.to_bytes())
    }
}

pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("connect to relay");
        Self { ws }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string()))
            .await
            .expect("send frame");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("send frame");
    }

    /// Next JSON frame within `wait`, or `None` on timeout or close.
    pub async fn try_recv_json(&mut self, wait: Duration) -> Option<Value> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Some(serde_json::from_str(&text).expect("relay sent JSON"));
                }
                Ok(Some(Ok(Message::Binary(data)))) => {
                    return Some(serde_json::from_slice(&data).expect("relay sent JSON"));
                }
                Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) | Err(_) => {
                    return None
                }
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    pub async fn recv_json(&mut self) -> Value {
        self.try_recv_json(RECV_TIMEOUT)
            .await
            .expect("expected a frame from the relay")
    }

    /// Assert nothing arrives for a short while.
    pub async fn expect_silence(&mut self) {
        if let Some(frame) = self.try_recv_json(QUIET_PERIOD).await {
            panic!("unexpected frame: {frame}");
        }
    }

    /// True if the relay closes the connection within the timeout.
    pub async fn closed_by_relay(&mut self) -> bool {
        let deadline = Instant::now() + RECV_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }

    pub async fn request_challenge(&mut self) -> String {
        self.send_json(json!({"type": "registerRequest"})).await;
        let reply = self.recv_json().await;
        assert_eq!(reply["type"], "challenge", "unexpected reply: {reply}");
        reply["challenge"].as_str().expect("challenge text").to_string()
    }

    /// Full handshake; panics unless the relay acknowledges.
    pub async fn register(&mut self, identity: &TestIdentity) {
        let challenge = self.request_challenge().await;
        self.send_json(json!({
            "type": "registerResponse",
            "publicKey": identity.public_key,
            "signature": identity.sign(&challenge),
        }))
        .await;

        let reply = self.recv_json().await;
        assert_eq!(reply["type"], "registered", "unexpected reply: {reply}");
        assert_eq!(reply["publicKey"], identity.public_key.as_str());
    }

    pub async fn send_pocket(&mut self, id: &str, sender: &str, receivers: &[&str]) {
        self.send_json(json!({
            "type": "pocket",
            "pocket": {
                "id": id,
                "senderPK": sender,
                "receiverPKs": receivers,
                "data": {"body": format!("payload for {id}")},
                "timestamp": 1_700_000_000_000u64,
                "signature": "deadbeef",
            }
        }))
        .await;
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

pub fn test_config() -> RelayConfig {
    RelayConfig {
        listen_addr: "127.0.0.1:0".parse().expect("socket address"),
        reconnect: ReconnectConfig::fixed(Duration::from_millis(150)),
        ..Default::default()
    }
}

pub async fn start_relay(config: RelayConfig) -> RunningRelay {
    RelayServer::new(config).start().await.expect("relay starts")
}

/// Two relays configured as each other's peers.
pub async fn start_mesh_pair() -> (RunningRelay, RunningRelay) {
    let l1 = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let l2 = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url1 = format!("ws://{}", l1.local_addr().expect("addr"));
    let url2 = format!("ws://{}", l2.local_addr().expect("addr"));

    let n1 = RelayServer::new(test_config().with_peers([url2]))
        .serve(l1)
        .expect("n1 starts");
    let n2 = RelayServer::new(test_config().with_peers([url1]))
        .serve(l2)
        .expect("n2 starts");

    wait_until(|| n1.state().peers().len() == 1 && n2.state().peers().len() == 1).await;
    (n1, n2)
}

/// Poll `condition` until it holds; panics after the receive timeout.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(10)).await;
    }
}

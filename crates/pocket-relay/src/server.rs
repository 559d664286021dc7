//! Relay server lifecycle
//!
//! Binds the WebSocket listener, starts peer links and the suppression
//! sweep, and hands back a `RunningRelay` that owns all of those tasks.
//! `RunningRelay::shutdown` stops the node and waits for the listener to be
//! released; dropping it aborts the same tasks without waiting.

use crate::config::RelayConfig;
use crate::connection::{ConnectionHandle, ConnectionRole};
use crate::error::RelayResult;
use crate::peers::PeerLinkManager;
use crate::relay::RelayState;
use crate::transport::{drive_connection, websocket_config};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::accept_async_with_config;
use tracing::{debug, info, warn};

/// Back-off after a failed `accept` (e.g. descriptor exhaustion).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Relay node builder.
#[derive(Debug, Clone)]
pub struct RelayServer {
    config: RelayConfig,
}

impl RelayServer {
    /// Server for `config`.
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Bind `listen_addr` and start serving.
    pub async fn start(self) -> RelayResult<RunningRelay> {
        self.config.validate()?;
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener)
    }

    /// Start serving on an already bound listener. `listen_addr` is ignored.
    pub fn serve(self, listener: TcpListener) -> RelayResult<RunningRelay> {
        self.config.validate()?;
        let local_addr = listener.local_addr()?;
        let peer_count = self.config.peers.len();
        let state = RelayState::new(self.config);

        let mut tasks = vec![
            tokio::spawn(accept_loop(listener, state.clone())),
            tokio::spawn(sweep_loop(state.clone())),
        ];
        tasks.extend(PeerLinkManager::new(state.clone()).spawn());

        info!(%local_addr, peers = peer_count, "Relay listening");

        Ok(RunningRelay {
            local_addr,
            state,
            tasks,
        })
    }
}

/// A started relay node.
pub struct RunningRelay {
    local_addr: SocketAddr,
    state: Arc<RelayState>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningRelay {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL for this node's listener.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Shared state, for inspection.
    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Stop every task and close every connection.
    ///
    /// Returns once the tasks have finished, so the listening port is free
    /// and no peer link will be redialled afterwards.
    pub async fn shutdown(mut self) {
        info!(local_addr = %self.local_addr, "Relay shutting down");
        let tasks = std::mem::take(&mut self.tasks);
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Relay task failed");
                }
            }
        }
        debug!(local_addr = %self.local_addr, "Relay stopped");
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<RelayState>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    connections.spawn(serve_inbound(stream, remote, state.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_inbound(stream: TcpStream, remote: SocketAddr, state: Arc<RelayState>) {
    let config = websocket_config(state.config().max_frame_bytes);
    let ws = match accept_async_with_config(stream, Some(config)).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%remote, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let (handle, outbound) =
        ConnectionHandle::with_capacity(state.config().outbound_queue_frames);
    debug!(conn = %handle.id(), %remote, "Accepted connection");

    drive_connection(
        state,
        ws,
        handle,
        outbound,
        ConnectionRole::Unauthenticated,
    )
    .await;
}

async fn sweep_loop(state: Arc<RelayState>) {
    let mut ticker = interval(state.config().sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let removed = state.router().sweep_seen();
        if removed > 0 {
            debug!(
                removed,
                remaining = state.router().seen_count(),
                "Suppression sweep"
            );
        }
    }
}

//! WebSocket connection driver
//!
//! Runs one connection to completion: a reader that feeds frames to
//! `RelayState` in arrival order, and a writer that drains the connection's
//! outbound queue. Both run inside the caller's task so that aborting the
//! task tears the socket down with it.

use crate::connection::{ConnectionHandle, ConnectionRole, Outbound};
use crate::relay::{ConnectionSession, Disposition, RelayState};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

/// How long a closing connection gets to flush queued frames.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Handshake settings shared by inbound and outbound connections.
///
/// Messages and frames above `max_frame_bytes` fail the read and close the
/// connection before the payload is buffered in full.
pub fn websocket_config(max_frame_bytes: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_frame_bytes);
    config.max_frame_size = Some(max_frame_bytes);
    config
}

/// Serve `ws` until either side closes, then release its relay state.
pub async fn drive_connection<S>(
    state: Arc<RelayState>,
    ws: WebSocketStream<S>,
    handle: ConnectionHandle,
    outbound: Receiver<Outbound>,
    role: ConnectionRole,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn = handle.id();
    let (sink, mut stream) = ws.split();
    let mut session = ConnectionSession::new(handle.clone(), role);

    let writer = write_loop(sink, outbound);
    tokio::pin!(writer);

    let writer_finished = tokio::select! {
        () = read_loop(&state, &mut stream, &mut session) => false,
        () = &mut writer => true,
    };

    state.teardown(&session);

    if !writer_finished {
        handle.close();
        if timeout(CLOSE_GRACE, writer).await.is_err() {
            debug!(%conn, "Writer did not flush before close deadline");
        }
    }
}

async fn read_loop<S>(
    state: &RelayState,
    stream: &mut SplitStream<WebSocketStream<S>>,
    session: &mut ConnectionSession,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let conn = session.id();

    while let Some(received) = stream.next().await {
        let frame = match received {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => {
                trace!(%conn, "Close frame received");
                return;
            }
            // Ping replies are queued by tungstenite itself.
            Ok(_) => continue,
            Err(e) => {
                debug!(%conn, error = %e, "Read failed");
                return;
            }
        };

        if state.handle_frame(session, &frame) == Disposition::Close {
            return;
        }
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: Receiver<Outbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(next) = outbound.recv().await {
        match next {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                    debug!(error = %e, "Write failed");
                    return;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

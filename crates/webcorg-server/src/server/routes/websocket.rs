//! Relay WebSocket endpoint.
//!
//! Each socket is split into a reader loop that feeds the lifecycle manager
//! and a writer task that drains the connection's outbound queue. The
//! transport's cancellation token is the close signal for both halves.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use webcorg_relay::{CloseCause, ConnectionId, OutboundFrame};

use crate::server::{AppState, Relay};

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

/// GET /ws
///
/// Upgrades to a WebSocket carrying the JSON relay protocol.
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| {
        let id = state.relay.on_accept();
        handle_socket(socket, id, Arc::clone(&state.relay), state.shutdown.clone())
    })
}

#[instrument(skip_all, fields(conn = %id))]
async fn handle_socket(
    socket: WebSocket,
    id: ConnectionId,
    relay: Arc<Relay>,
    shutdown: CancellationToken,
) {
    let (outbound, closed) = relay.transport().attach(id);
    info!("WebSocket connection established");

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_frames(sink, outbound, closed.clone()));

    let cause = loop {
        tokio::select! {
            _ = closed.cancelled() => break CloseCause::Forced,
            _ = shutdown.cancelled() => break CloseCause::Forced,
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let outcome = relay.on_message(id, &text);
                    trace!(?outcome, "Processed frame");
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("Discarding binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break CloseCause::Voluntary,
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break CloseCause::Error;
                }
            },
        }
    };

    relay.on_close(id, cause);
    if let Err(e) = writer.await {
        warn!(error = %e, "WebSocket writer task failed");
    }
    info!(%cause, "WebSocket connection closed");
}

/// Forward queued frames to the socket until the connection is closed.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(Message::Text(frame.payload.to_string())).await {
                    debug!(error = %e, "Failed to write frame");
                    return;
                }
            }
            _ = closed.cancelled() => break,
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

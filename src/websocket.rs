use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::DisconnectReason;
use crate::protocol::validate;
use crate::registry::Peer;
use crate::relay::Relay;
use crate::server::AppState;

/// WebSocket upgrade handler. A full registry refuses the upgrade outright,
/// before any handshake data is exchanged; the refused party never gets an
/// identity. The authoritative check is re-run atomically inside `admit`.
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.relay.registry().has_capacity() {
        warn!(%remote_addr, "refusing connection, registry full");
        counter!("relay_admissions_refused_total", 1);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay, remote_addr))
}

/// Drive one connection: writer task, admission, receive loop, teardown.
async fn handle_socket(socket: WebSocket, relay: Relay, remote_addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Forward queued frames to the socket. Ends when every sender is gone
    // (registry removal) or after forwarding a close frame.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let peer_id = match relay.register(Peer::new(tx, remote_addr)) {
        Ok(id) => id,
        Err(err) => {
            // lost the race between the upgrade check and admission
            warn!(%remote_addr, %err, "closing connection admitted past capacity");
            writer.abort();
            return;
        }
    };
    debug!(peer_id = %peer_id, %remote_addr, "websocket connected");

    let reason = loop {
        let Some(frame) = receiver.next().await else {
            break DisconnectReason::ClientClosed;
        };
        match frame {
            Ok(Message::Text(text)) => handle_frame(&relay, &peer_id, &text),
            Ok(Message::Binary(data)) => {
                // JSON over binary frames is accepted for client compatibility
                match std::str::from_utf8(&data) {
                    Ok(text) => handle_frame(&relay, &peer_id, text),
                    Err(_) => {
                        warn!(peer_id = %peer_id, "dropping non-UTF8 binary frame")
                    }
                }
            }
            Ok(Message::Pong(_)) => relay.registry().touch(&peer_id),
            Ok(Message::Ping(_)) => {
                // the transport answers pings for us; nothing to do
            }
            Ok(Message::Close(_)) => break DisconnectReason::ClientClosed,
            Err(err) => {
                warn!(peer_id = %peer_id, error = %err, "websocket transport error");
                break DisconnectReason::TransportError;
            }
        }
    };

    relay.disconnect(&peer_id, reason);
    debug!(peer_id = %peer_id, "websocket closed");
}

fn handle_frame(relay: &Relay, peer_id: &str, text: &str) {
    match validate(text) {
        Ok(envelope) => {
            relay.registry().touch(peer_id);
            relay.route(peer_id, envelope);
        }
        Err(err) => {
            // dropped silently; the sender is never told
            warn!(peer_id = %peer_id, error = %err, "dropping invalid message");
            counter!("relay_validation_failures_total", 1, "reason" => err.metric_label());
        }
    }
}

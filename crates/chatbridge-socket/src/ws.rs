//! `WebSocket` handler for replication peers.
//!
//! Peers connect to `GET /` with the handshake headers. Once upgraded the
//! server sends a single `connection-info` frame, then the connection
//! carries application frames in both directions until either side closes
//! or the peer sends something it must not.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chatbridge_types::{Frame, SocketConnectionInfo};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::handshake;
use crate::registry::Admission;
use crate::state::{Outbound, ServerState};

/// Validate the handshake headers, then upgrade.
///
/// # Route
///
/// `GET /`
pub async fn ws_peer(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
) -> Response {
    let handshake = match handshake::verify(&headers, state.key()) {
        Ok(handshake) => handshake,
        Err(error) => {
            warn!(%error, "replication handshake refused");
            return error.into_response();
        }
    };
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    let admission = match state.admit(handshake) {
        Ok(admission) => admission,
        Err(error) => {
            warn!(%error, "replication handshake refused");
            return error.into_response();
        }
    };

    let failed = Arc::clone(&state);
    upgrade
        .on_failed_upgrade(move |error| {
            warn!(socket_id = %admission.socket_id, %error, "replication upgrade failed");
            failed.release(admission);
        })
        .on_upgrade(move |socket| handle_peer(socket, state, admission))
}

/// Drive one peer connection until it ends.
async fn handle_peer(socket: WebSocket, state: Arc<ServerState>, admission: Admission) {
    let socket_id = admission.socket_id;
    let (mut sink, mut stream) = socket.split();

    let info = match Frame::ConnectionInfo(SocketConnectionInfo { socket_id }).encode() {
        Ok(info) => info,
        Err(error) => {
            warn!(%socket_id, %error, "failed to encode connection-info");
            state.release(admission);
            return;
        }
    };

    // Attached before the peer learns its id, so nothing published after
    // that point can miss it. Frames queued meanwhile wait in `rx`.
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.attach(admission, tx);
    if sink.send(Message::Text(info.into())).await.is_err() {
        debug!(%socket_id, "replication peer gone before connection-info");
        state.detach(admission);
        return;
    }
    info!(%socket_id, "replication peer connected");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            debug!(%socket_id, "replication peer disconnected (send failed)");
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        if let Err(error) = sink.send(Message::Close(None)).await {
                            debug!(%socket_id, %error, "close frame not delivered");
                        }
                        break;
                    }
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match state.receive(socket_id, text.as_str()) {
                            Ok(()) => {}
                            Err(error) if error.is_fatal() => {
                                warn!(%socket_id, %error, "closing replication peer");
                                if let Err(error) = sink.send(Message::Close(None)).await {
                                    debug!(%socket_id, %error, "close frame not delivered");
                                }
                                break;
                            }
                            Err(error) => {
                                warn!(%socket_id, %error, "dropping replication frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            debug!(%socket_id, "replication peer disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%socket_id, "replication peer closed the connection");
                        break;
                    }
                    Some(Err(error)) => {
                        debug!(%socket_id, %error, "replication socket error");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary and pong frames carry nothing for us.
                    }
                }
            }
        }
    }

    state.detach(admission);
    info!(%socket_id, "replication peer disconnected");
}

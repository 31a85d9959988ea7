use std::{net::SocketAddr, sync::Arc};

use archway_core::{
    Connection, ConnectionEvent, ConnectionId, ConnectionLifecycle, LifecycleState, Payload,
    Transition,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    state::AppState,
    transport::{frame_to_event, WsOutbound},
};

/// WebSocket upgrade handler for the relay.
pub async fn ws_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, remote_addr: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(state.outbound_buffer());

    let connection =
        Arc::new(Connection::new(WsOutbound::new(tx)).with_remote_addr(remote_addr));
    let connection_id = connection.id();
    let mut lifecycle = ConnectionLifecycle::new(connection, state.relay().clone());
    lifecycle.handle(ConnectionEvent::Accepted);
    state.on_connection_added();

    info!(
        connection_id = %connection_id,
        remote_addr = %remote_addr,
        "client connected for real-time collaboration"
    );

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        debug!(connection_id = %connection_id, "writer task finished");
    });

    while let Some(frame) = ws_rx.next().await {
        let Some(event) = frame_to_event(frame) else {
            continue;
        };
        if let ConnectionEvent::Message(payload) = &event {
            log_inbound(connection_id, payload);
        }

        match lifecycle.handle(event) {
            Transition::Relayed(report) => state.record_relay(&report),
            Transition::Closed(cause) => {
                state.on_connection_removed(&cause);
                break;
            }
            Transition::Opened | Transition::Ignored => {}
        }
    }

    // The stream can end without a close frame when the peer drops the TCP
    // connection.
    if lifecycle.state() == LifecycleState::Open {
        if let Transition::Closed(cause) = lifecycle.handle(ConnectionEvent::Close(None)) {
            state.on_connection_removed(&cause);
        }
    }
    writer.abort();

    info!(connection_id = %connection_id, "client disconnected");
}

fn log_inbound(connection_id: ConnectionId, payload: &Payload) {
    match payload {
        Payload::Text(text) => {
            debug!(connection_id = %connection_id, "received: {}", text)
        }
        Payload::Binary(bytes) => {
            debug!(connection_id = %connection_id, len = bytes.len(), "received binary frame")
        }
    }
}

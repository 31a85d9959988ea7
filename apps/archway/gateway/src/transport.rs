//! WebSocket side of the relay: maps axum frames to connection events and
//! feeds relayed payloads into each socket's outbound queue.

use archway_core::{ConnectionError, ConnectionEvent, Outbound, Payload, SendFailure};
use axum::extract::ws::Message;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Bounded queue drained by the connection's writer task. A full queue
/// rejects the frame rather than waiting on a slow socket.
pub struct WsOutbound {
    tx: mpsc::Sender<Message>,
}

impl WsOutbound {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }
}

impl Outbound for WsOutbound {
    fn send(&self, payload: Payload) -> Result<(), SendFailure> {
        self.tx
            .try_send(payload_to_message(payload))
            .map_err(|err| match err {
                TrySendError::Full(_) => SendFailure::QueueFull,
                TrySendError::Closed(_) => SendFailure::Closed,
            })
    }
}

pub fn payload_to_message(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text),
        Payload::Binary(bytes) => Message::Binary(bytes.to_vec()),
    }
}

/// Translates one item from the socket stream. Ping and pong frames are
/// answered by axum and produce no event.
pub fn frame_to_event(frame: Result<Message, axum::Error>) -> Option<ConnectionEvent> {
    match frame {
        Ok(Message::Text(text)) => Some(ConnectionEvent::Message(Payload::Text(text))),
        Ok(Message::Binary(bytes)) => Some(ConnectionEvent::Message(Payload::from(bytes))),
        Ok(Message::Close(frame)) => Some(ConnectionEvent::Close(
            frame
                .map(|f| f.reason.to_string())
                .filter(|reason| !reason.is_empty()),
        )),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(err) => Some(ConnectionEvent::Error(ConnectionError::new(err.to_string()))),
    }
}

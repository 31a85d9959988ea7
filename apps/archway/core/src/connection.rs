use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU8, Ordering},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::SendFailure, payload::Payload};

/// Opaque identity of a connection. Equality on this id is what the relay
/// uses to exclude the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

impl ConnectionState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_OPEN => ConnectionState::Open,
            STATE_CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Send half of a duplex transport. Implementations must not block: a
/// transport that cannot accept the payload right now reports
/// [`SendFailure::QueueFull`] instead of waiting.
pub trait Outbound: Send + Sync {
    fn send(&self, payload: Payload) -> Result<(), SendFailure>;
}

/// One live duplex connection as seen by the registry and relay.
pub struct Connection {
    id: ConnectionId,
    state: AtomicU8,
    outbound: Box<dyn Outbound>,
    remote_addr: Option<SocketAddr>,
}

impl Connection {
    pub fn new(outbound: impl Outbound + 'static) -> Self {
        Self::with_id(ConnectionId::new(), outbound)
    }

    pub fn with_id(id: ConnectionId, outbound: impl Outbound + 'static) -> Self {
        Self {
            id,
            state: AtomicU8::new(STATE_OPEN),
            outbound: Box::new(outbound),
            remote_addr: None,
        }
    }

    pub fn with_remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Hands the payload to the transport. Connections that are no longer
    /// open refuse the payload without touching the transport.
    pub fn send(&self, payload: Payload) -> Result<(), SendFailure> {
        if !self.is_open() {
            return Err(SendFailure::Closed);
        }
        self.outbound.send(payload)
    }

    /// Open -> Closing. Returns false if the connection had already left
    /// the open state.
    pub(crate) fn mark_closing(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_OPEN,
                STATE_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn mark_closed(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingOutbound;

    #[test_timeout::timeout]
    fn new_connection_is_open() {
        let (outbound, _inbox) = RecordingOutbound::new();
        let connection = Connection::new(outbound);
        assert_eq!(connection.state(), ConnectionState::Open);
        assert!(connection.remote_addr().is_none());
    }

    #[test_timeout::timeout]
    fn closing_only_happens_once() {
        let (outbound, _inbox) = RecordingOutbound::new();
        let connection = Connection::new(outbound);
        assert!(connection.mark_closing());
        assert!(!connection.mark_closing());
        assert_eq!(connection.state(), ConnectionState::Closing);
        connection.mark_closed();
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[test_timeout::timeout]
    fn send_after_close_is_refused() {
        let (outbound, inbox) = RecordingOutbound::new();
        let connection = Connection::new(outbound);
        connection.send(Payload::from("first")).expect("open send");
        connection.mark_closing();
        connection.mark_closed();

        assert_eq!(
            connection.send(Payload::from("second")),
            Err(SendFailure::Closed)
        );
        assert_eq!(inbox.received(), vec![Payload::from("first")]);
    }

    #[test_timeout::timeout]
    fn remote_addr_is_kept_for_diagnostics() {
        let (outbound, _inbox) = RecordingOutbound::new();
        let addr: SocketAddr = "127.0.0.1:4100".parse().unwrap();
        let connection = Connection::new(outbound).with_remote_addr(addr);
        assert_eq!(connection.remote_addr(), Some(addr));
    }
}

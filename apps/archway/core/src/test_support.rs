use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Connection, ConnectionRegistry, Outbound, Payload, SendFailure};

/// Outbound that records every payload it accepts.
pub struct RecordingOutbound {
    inbox: Inbox,
}

#[derive(Clone, Default)]
pub struct Inbox {
    received: Arc<Mutex<Vec<Payload>>>,
}

impl Inbox {
    pub fn received(&self) -> Vec<Payload> {
        self.received.lock().clone()
    }
}

impl RecordingOutbound {
    pub fn new() -> (Self, Inbox) {
        let inbox = Inbox::default();
        (
            Self {
                inbox: inbox.clone(),
            },
            inbox,
        )
    }
}

impl Outbound for RecordingOutbound {
    fn send(&self, payload: Payload) -> Result<(), SendFailure> {
        self.inbox.received.lock().push(payload);
        Ok(())
    }
}

/// Outbound whose transport always rejects the payload.
pub struct FailingOutbound(pub SendFailure);

impl Outbound for FailingOutbound {
    fn send(&self, _payload: Payload) -> Result<(), SendFailure> {
        Err(self.0.clone())
    }
}

/// Creates a recording connection and registers it.
pub fn join(registry: &ConnectionRegistry) -> (Arc<Connection>, Inbox) {
    let (outbound, inbox) = RecordingOutbound::new();
    let connection = Arc::new(Connection::new(outbound));
    registry.register(Arc::clone(&connection));
    (connection, inbox)
}

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionId},
    error::ConnectionError,
    payload::Payload,
    relay::{BroadcastRelay, BroadcastReport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Pending,
    Open,
    Closed,
}

/// Transport-level notification for one connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Accepted,
    Message(Payload),
    /// Close notification, with the peer's close reason if it sent one.
    Close(Option<String>),
    Error(ConnectionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Accepted,
    Message,
    Close,
    Error,
}

impl ConnectionEvent {
    fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Accepted => EventKind::Accepted,
            ConnectionEvent::Message(_) => EventKind::Message,
            ConnectionEvent::Close(_) => EventKind::Close,
            ConnectionEvent::Error(_) => EventKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Register,
    Relay,
    Deregister,
    /// Closed before it was ever registered.
    Abandon,
    Ignore,
}

/// The whole state machine. Anything not listed leaves the state unchanged.
fn dispatch(state: LifecycleState, kind: EventKind) -> (Action, LifecycleState) {
    use EventKind as E;
    use LifecycleState as S;

    match (state, kind) {
        (S::Pending, E::Accepted) => (Action::Register, S::Open),
        (S::Pending, E::Close | E::Error) => (Action::Abandon, S::Closed),
        (S::Open, E::Message) => (Action::Relay, S::Open),
        (S::Open, E::Close | E::Error) => (Action::Deregister, S::Closed),
        (S::Closed, _) => (Action::Ignore, S::Closed),
        (S::Pending, E::Message) | (S::Open, E::Accepted) => (Action::Ignore, state),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    Remote(Option<String>),
    Error(ConnectionError),
}

impl CloseCause {
    pub fn metric_label(&self) -> &'static str {
        match self {
            CloseCause::Remote(_) => "remote_close",
            CloseCause::Error(_) => "transport_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Relayed(BroadcastReport),
    Closed(CloseCause),
    Ignored,
}

/// Drives one connection through `Pending -> Open -> Closed`, keeping the
/// registry membership in step with the transport's events.
///
/// Owned by the task reading the connection, so events for a single
/// connection are always handled one at a time.
pub struct ConnectionLifecycle {
    connection: Arc<Connection>,
    relay: BroadcastRelay,
    state: LifecycleState,
}

impl ConnectionLifecycle {
    pub fn new(connection: Arc<Connection>, relay: BroadcastRelay) -> Self {
        Self {
            connection,
            relay,
            state: LifecycleState::Pending,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Transition {
        let (action, next) = dispatch(self.state, event.kind());
        let id = self.connection.id();

        let transition = match (action, event) {
            (Action::Register, _) => {
                self.relay.registry().register(Arc::clone(&self.connection));
                Transition::Opened
            }
            (Action::Relay, ConnectionEvent::Message(payload)) => {
                Transition::Relayed(self.relay.broadcast(id, &payload))
            }
            (Action::Deregister, event) => {
                let cause = close_cause(id, event);
                self.connection.mark_closing();
                self.relay.registry().deregister(id);
                self.connection.mark_closed();
                Transition::Closed(cause)
            }
            (Action::Abandon, event) => {
                let cause = close_cause(id, event);
                self.connection.mark_closing();
                self.connection.mark_closed();
                Transition::Closed(cause)
            }
            (Action::Ignore | Action::Relay, event) => {
                debug!(
                    connection_id = %id,
                    state = ?self.state,
                    event = ?event.kind(),
                    "ignoring connection event"
                );
                Transition::Ignored
            }
        };

        self.state = next;
        transition
    }
}

fn close_cause(id: ConnectionId, event: ConnectionEvent) -> CloseCause {
    match event {
        ConnectionEvent::Error(err) => {
            warn!(connection_id = %id, error = %err, "connection error");
            CloseCause::Error(err)
        }
        ConnectionEvent::Close(reason) => CloseCause::Remote(reason),
        ConnectionEvent::Accepted | ConnectionEvent::Message(_) => CloseCause::Remote(None),
    }
}

impl Drop for ConnectionLifecycle {
    fn drop(&mut self) {
        // A reader task that goes away without a close event must not leave
        // the connection registered.
        if self.state == LifecycleState::Open {
            info!(
                connection_id = %self.connection.id(),
                "connection dropped while open; deregistering"
            );
            let _ = self.handle(ConnectionEvent::Close(None));
        }
    }
}

//! Shared primitives for the Archway real-time relay: the connection
//! registry, the broadcast relay that fans a payload out to every other
//! peer, and the per-connection lifecycle state machine that ties transport
//! events to both. The transport itself (WebSocket or otherwise) lives in
//! the gateway and plugs in through [`Outbound`].

mod connection;
mod error;
mod lifecycle;
mod payload;
mod registry;
mod relay;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{Connection, ConnectionId, ConnectionState, Outbound};
pub use error::{ConnectionError, SendFailure};
pub use lifecycle::{CloseCause, ConnectionEvent, ConnectionLifecycle, LifecycleState, Transition};
pub use payload::Payload;
pub use registry::{ConnectionRegistry, Snapshot, SnapshotEntry};
pub use relay::{BroadcastRelay, BroadcastReport};

use metrics::counter;
use tracing::{debug, warn};

use crate::{
    connection::ConnectionId,
    payload::Payload,
    registry::{ConnectionRegistry, Snapshot},
};

/// Fans a payload out to every registered connection except its sender.
///
/// Delivery order across recipients is unspecified, and two broadcasts from
/// different senders racing each other carry no relative ordering. Payloads
/// from a single sender arrive in the order that sender's broadcasts ran.
#[derive(Clone, Default)]
pub struct BroadcastRelay {
    registry: ConnectionRegistry,
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members of the snapshot other than the sender.
    pub recipients: usize,
    pub delivered: usize,
    /// Recipients that were no longer open.
    pub skipped: usize,
    pub failed: usize,
    pub bytes: usize,
}

impl BroadcastRelay {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn broadcast(&self, sender: ConnectionId, payload: &Payload) -> BroadcastReport {
        let snapshot = self.registry.snapshot();
        self.deliver(&snapshot, sender, payload)
    }

    /// Delivers against a snapshot that was already taken. Membership
    /// changes after the snapshot are not seen, but a recipient that left
    /// the open state in the meantime is skipped.
    pub fn deliver(
        &self,
        snapshot: &Snapshot,
        sender: ConnectionId,
        payload: &Payload,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let bytes = payload.len();

        for connection in snapshot.connections() {
            if connection.id() == sender {
                continue;
            }
            report.recipients += 1;

            if !connection.is_open() {
                report.skipped += 1;
                continue;
            }

            match connection.send(payload.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    report.bytes += bytes;
                }
                Err(err) => {
                    report.failed += 1;
                    counter!(
                        "archway_relay_send_failures_total",
                        1,
                        "reason" => err.metric_label()
                    );
                    warn!(
                        sender = %sender,
                        connection_id = %connection.id(),
                        error = %err,
                        "failed to relay payload"
                    );
                }
            }
        }

        debug!(
            sender = %sender,
            kind = payload.kind(),
            recipients = report.recipients,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "broadcast complete"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_support::{join, FailingOutbound, Inbox},
        Connection, SendFailure,
    };
    use std::sync::{Arc, Barrier};

    fn relay_with(count: usize) -> (BroadcastRelay, Vec<(Arc<Connection>, Inbox)>) {
        let registry = ConnectionRegistry::new();
        let peers = (0..count).map(|_| join(&registry)).collect();
        (BroadcastRelay::new(registry), peers)
    }

    #[test_timeout::timeout]
    fn delivers_to_everyone_but_sender() {
        let (relay, peers) = relay_with(3);
        let (a, a_inbox) = &peers[0];
        let (_, b_inbox) = &peers[1];
        let (_, c_inbox) = &peers[2];

        let report = relay.broadcast(a.id(), &Payload::from("hello"));

        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.bytes, 10);
        assert!(a_inbox.received().is_empty());
        assert_eq!(b_inbox.received(), vec![Payload::from("hello")]);
        assert_eq!(c_inbox.received(), vec![Payload::from("hello")]);
    }

    #[test_timeout::timeout]
    fn failed_recipient_does_not_block_others() {
        let registry = ConnectionRegistry::new();
        let (a, _) = join(&registry);
        let broken = Arc::new(Connection::new(FailingOutbound(SendFailure::QueueFull)));
        registry.register(Arc::clone(&broken));
        let (_, c_inbox) = join(&registry);
        let relay = BroadcastRelay::new(registry);

        let report = relay.broadcast(a.id(), &Payload::from("update"));

        assert_eq!(report.recipients, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(c_inbox.received(), vec![Payload::from("update")]);
    }

    #[test_timeout::timeout]
    fn deregistered_connection_never_receives() {
        let (relay, peers) = relay_with(3);
        let (a, _) = &peers[0];
        let (b, b_inbox) = &peers[1];
        let (_, c_inbox) = &peers[2];

        relay.registry().deregister(b.id());
        let report = relay.broadcast(a.id(), &Payload::from("after-leave"));

        assert_eq!(report.recipients, 1);
        assert!(b_inbox.received().is_empty());
        assert_eq!(c_inbox.received(), vec![Payload::from("after-leave")]);
    }

    #[test_timeout::timeout]
    fn recipient_closed_after_snapshot_is_skipped() {
        let (relay, peers) = relay_with(3);
        let (a, _) = &peers[0];
        let (b, b_inbox) = &peers[1];
        let (_, c_inbox) = &peers[2];

        let snapshot = relay.registry().snapshot();
        b.mark_closing();
        relay.registry().deregister(b.id());
        b.mark_closed();

        let report = relay.deliver(&snapshot, a.id(), &Payload::from("in-flight"));

        assert_eq!(report.recipients, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.delivered, 1);
        assert!(b_inbox.received().is_empty());
        assert_eq!(c_inbox.received(), vec![Payload::from("in-flight")]);
    }

    #[test_timeout::timeout]
    fn two_peer_session_then_solo() {
        let (relay, peers) = relay_with(2);
        let (a, a_inbox) = &peers[0];
        let (b, b_inbox) = &peers[1];

        relay.broadcast(a.id(), &Payload::from("hello"));
        assert_eq!(b_inbox.received(), vec![Payload::from("hello")]);
        assert!(a_inbox.received().is_empty());

        relay.registry().deregister(b.id());
        let report = relay.broadcast(a.id(), &Payload::from("ping"));

        assert_eq!(report, BroadcastReport::default());
        assert!(a_inbox.received().is_empty());
        assert_eq!(b_inbox.received(), vec![Payload::from("hello")]);
    }

    #[test_timeout::timeout]
    fn concurrent_senders_reach_everyone_else() {
        let (relay, peers) = relay_with(3);
        let (a, a_inbox) = peers[0].clone();
        let (b, b_inbox) = peers[1].clone();
        let (_, c_inbox) = peers[2].clone();
        let barrier = Arc::new(Barrier::new(2));

        let senders: Vec<_> = [(a.id(), "x"), (b.id(), "y")]
            .into_iter()
            .map(|(sender, text)| {
                let relay = relay.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    relay.broadcast(sender, &Payload::from(text))
                })
            })
            .collect();
        for sender in senders {
            let report = sender.join().expect("sender thread panicked");
            assert_eq!(report.delivered, 2);
        }

        let mut c_received = c_inbox.received();
        c_received.sort_by_key(|payload| format!("{payload:?}"));
        assert_eq!(c_received, vec![Payload::from("x"), Payload::from("y")]);
        assert_eq!(a_inbox.received(), vec![Payload::from("y")]);
        assert_eq!(b_inbox.received(), vec![Payload::from("x")]);
    }

    #[test_timeout::timeout]
    fn single_sender_order_is_preserved() {
        let (relay, peers) = relay_with(2);
        let (a, _) = &peers[0];
        let (_, b_inbox) = &peers[1];

        for n in 0..50 {
            relay.broadcast(a.id(), &Payload::from(n.to_string()));
        }

        let expected: Vec<Payload> = (0..50).map(|n| Payload::from(n.to_string())).collect();
        assert_eq!(b_inbox.received(), expected);
    }

    #[test_timeout::timeout]
    fn binary_payload_passes_through_untouched() {
        let (relay, peers) = relay_with(2);
        let (a, _) = &peers[0];
        let (_, b_inbox) = &peers[1];
        let frame = Payload::from(vec![0x00, 0xff, 0x9f, 0x92]);

        relay.broadcast(a.id(), &frame);

        assert_eq!(b_inbox.received(), vec![frame]);
    }
}

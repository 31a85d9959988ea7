use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use slab::Slab;

use crate::connection::{Connection, ConnectionId};

/// Set of currently open connections, keyed by identity.
///
/// All membership changes and snapshots go through one mutex. The lock is
/// only held for the slab/index update or for cloning the member `Arc`s, so
/// a slow peer can never stall registration: sends happen on a snapshot,
/// outside the lock.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    slab: Slab<RegistryEntry>,
    index_map: HashMap<ConnectionId, usize>,
    next_seq: u64,
}

struct RegistryEntry {
    seq: u64,
    connection: Arc<Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the connection. Registering an id that is already present is a
    /// no-op; returns whether the connection was newly added.
    pub fn register(&self, connection: Arc<Connection>) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let id = connection.id();
        if inner.index_map.contains_key(&id) {
            return false;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let key = inner.slab.insert(RegistryEntry { seq, connection });
        inner.index_map.insert(id, key);
        true
    }

    /// Removes the connection if present; returns whether anything was removed.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.index_map.remove(&id) {
            Some(key) => {
                inner.slab.remove(key);
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of the membership, ordered by registration.
    pub fn snapshot(&self) -> Snapshot {
        let mut entries: Vec<SnapshotEntry> = {
            let guard = self.inner.lock();
            guard
                .slab
                .iter()
                .map(|(_, entry)| SnapshotEntry {
                    registered_seq: entry.seq,
                    connection: Arc::clone(&entry.connection),
                })
                .collect()
        };
        entries.sort_unstable_by_key(|entry| entry.registered_seq);

        Snapshot {
            entries: entries.into(),
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.lock().index_map.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable view of the registry taken under the registry lock. Later
/// register/deregister calls never show up in an existing snapshot.
#[derive(Clone, Default)]
pub struct Snapshot {
    entries: Arc<[SnapshotEntry]>,
}

#[derive(Clone)]
pub struct SnapshotEntry {
    registered_seq: u64,
    connection: Arc<Connection>,
}

impl SnapshotEntry {
    pub fn registered_seq(&self) -> u64 {
        self.registered_seq
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn connections(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.entries.iter().map(|entry| &entry.connection)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections().map(|connection| connection.id()).collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections().any(|connection| connection.id() == id)
    }
}

//! The distributed routing table (spec §3, §4.3).
//!
//! Keys are peer identifiers; this node's own id is never a key. A
//! [`RoutingEntry::Direct`] holds the sending half of the mpsc channel
//! feeding that connection's writer task — the live "connection
//! handle" — while a [`RoutingEntry::Remote`] only names a next-hop
//! peer. All mutation and iteration goes through a single lock so
//! broadcast loops (`snapshot`) never observe a half-applied gossip
//! update, matching the discipline `freeq-server`'s `SharedState`
//! enforces with `parking_lot::Mutex` around every shared map.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{PeerError, Result};
use crate::identifier::PeerId;
use crate::message::PeerMessage;

/// One routing-table entry: a live connection, or a hop to a peer that
/// is known to be reachable via someone else.
#[derive(Clone)]
pub enum RoutingEntry {
    Direct { conn: mpsc::Sender<PeerMessage> },
    Remote { via: PeerId },
}

impl RoutingEntry {
    pub fn is_direct(&self) -> bool {
        matches!(self, RoutingEntry::Direct { .. })
    }

    pub fn via(&self) -> Option<PeerId> {
        match self {
            RoutingEntry::Remote { via } => Some(*via),
            RoutingEntry::Direct { .. } => None,
        }
    }
}

struct Inner {
    entries: HashMap<PeerId, RoutingEntry>,
    // Insertion order, oldest first. Kept separate from the HashMap so
    // `snapshot` can hand out a stable iteration order.
    order: Vec<PeerId>,
}

pub struct RoutingTable {
    inner: Mutex<Inner>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Insert or replace a Direct entry for `id`.
    pub fn add_direct(&self, id: PeerId, conn: mpsc::Sender<PeerMessage>) {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&id) {
            inner.order.push(id);
        }
        inner.entries.insert(id, RoutingEntry::Direct { conn });
    }

    /// Insert a Remote entry for `id` only if absent. Never overwrites
    /// an existing Direct entry with a Remote one.
    pub fn add_remote(&self, id: PeerId, via: PeerId) {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&id) {
            return;
        }
        inner.order.push(id);
        inner.entries.insert(id, RoutingEntry::Remote { via });
    }

    /// Remove `id`. No-op if absent.
    pub fn remove(&self, id: PeerId) {
        let mut inner = self.inner.lock();
        if inner.entries.remove(&id).is_some() {
            inner.order.retain(|e| *e != id);
        }
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk Remote -> via chains until a Direct entry's connection is
    /// reached, bounded by the table's current size so a cycle cannot
    /// loop forever.
    pub fn resolve(&self, id: PeerId) -> Result<mpsc::Sender<PeerMessage>> {
        let inner = self.inner.lock();
        let hop_cap = inner.entries.len();
        let mut current = id;
        let mut hops = 0usize;
        loop {
            match inner.entries.get(&current) {
                Some(RoutingEntry::Direct { conn }) => return Ok(conn.clone()),
                Some(RoutingEntry::Remote { via }) => {
                    if hops >= hop_cap {
                        return Err(PeerError::NoRoute(id));
                    }
                    hops += 1;
                    current = *via;
                }
                None => return Err(PeerError::NoRoute(id)),
            }
        }
    }

    /// A consistent snapshot of (id, entry) pairs in insertion order.
    /// Broadcast loops must iterate this, never the live map, so they
    /// cannot observe a mutation mid-iteration.
    pub fn snapshot(&self) -> Vec<(PeerId, RoutingEntry)> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).map(|e| (*id, e.clone())))
            .collect()
    }
}

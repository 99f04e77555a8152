//! [`NodeState`]: the single value threaded by reference into every
//! worker, the listener, and the controller.
//!
//! The original implementation held the routing table, buffer, exit
//! flag, logger, and self-id as process-global singletons (a `Peer`
//! class of all-static members plus a couple of module-level
//! variables). This aggregates them into one value instead, per the
//! REDESIGN FLAGS note in spec §9 ("Global state -> explicit
//! context") — same cross-worker sharing, explicit lifecycle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;

use crate::buffer::PendingBuffer;
use crate::identifier::PeerId;
use crate::routing::RoutingTable;

pub struct NodeState {
    /// This node's own id. Writable only during the bounded outbound
    /// handshake retry loop, before any worker is spawned; immutable
    /// thereafter (spec §5).
    self_id: RwLock<PeerId>,
    /// One-shot false->true shutdown signal. Readers may observe it
    /// without locking.
    exit: AtomicBool,
    /// Count of inbound connections currently occupying a slot under
    /// `connection_cap`. Tracked separately from the routing table,
    /// which also holds remote (non-connection) entries learned via
    /// gossip and this node's own outbound connection.
    inbound_connections: AtomicUsize,
    /// Where a message addressed to this node is delivered. The CLI
    /// leaves this unset and prints to stdout instead; tests set it to
    /// observe delivered text without scraping stdout.
    inbox: RwLock<Option<UnboundedSender<(PeerId, String)>>>,
    pub routing: RoutingTable,
    pub pending: PendingBuffer,
    pub connection_cap: usize,
    pub handshake_attempts: u8,
}

impl NodeState {
    pub fn new(initial_id: PeerId, connection_cap: usize, handshake_attempts: u8) -> Self {
        NodeState {
            self_id: RwLock::new(initial_id),
            exit: AtomicBool::new(false),
            inbound_connections: AtomicUsize::new(0),
            inbox: RwLock::new(None),
            routing: RoutingTable::new(),
            pending: PendingBuffer::new(),
            connection_cap,
            handshake_attempts,
        }
    }

    /// Redirect locally-addressed message delivery to `tx` instead of
    /// stdout, for observing delivery in tests.
    pub fn set_inbox(&self, tx: UnboundedSender<(PeerId, String)>) {
        *self.inbox.write() = Some(tx);
    }

    /// Deliver a message addressed to this node: to the test inbox if
    /// one is registered, otherwise printed to stdout.
    pub(crate) fn deliver(&self, from: PeerId, text: &str) {
        match &*self.inbox.read() {
            Some(tx) => {
                let _ = tx.send((from, text.to_string()));
            }
            None => println!("[Peer {from}]: {text}"),
        }
    }

    pub fn self_id(&self) -> PeerId {
        *self.self_id.read()
    }

    /// Replace this node's id. Only safe before any worker observes
    /// the old value, i.e. during the outbound handshake retry loop.
    pub fn set_self_id(&self, id: PeerId) {
        *self.self_id.write() = id;
    }

    pub fn is_exiting(&self) -> bool {
        self.exit.load(Ordering::Relaxed)
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    /// Claim one inbound-connection slot if `connection_cap` is not
    /// yet reached. Returns whether the slot was granted.
    pub fn try_acquire_inbound_slot(&self) -> bool {
        self.inbound_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < self.connection_cap {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Release a slot previously granted by `try_acquire_inbound_slot`.
    pub fn release_inbound_slot(&self) {
        self.inbound_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

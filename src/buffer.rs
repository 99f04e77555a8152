//! The pending buffer: per-destination FIFO queues of messages
//! awaiting a route (spec §3, §4.4).
//!
//! Grounded on the original implementation's `modules/buffer.py`
//! (`PeerBuffer`, a dict of lists) and `freeq-server`'s habit of
//! wrapping every shared collection in its own `parking_lot::Mutex`
//! rather than one big lock over unrelated state.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::identifier::PeerId;
use crate::message::PeerMessage;

#[derive(Default)]
pub struct PendingBuffer {
    queues: Mutex<HashMap<PeerId, VecDeque<PeerMessage>>>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `msg` to the queue for `dest`, creating it if absent.
    pub fn enqueue(&self, dest: PeerId, msg: PeerMessage) {
        self.queues.lock().entry(dest).or_default().push_back(msg);
    }

    /// Atomically remove and return the queue for `dest`, in FIFO
    /// order. Empty if absent.
    pub fn drain(&self, dest: PeerId) -> Vec<PeerMessage> {
        self.queues
            .lock()
            .remove(&dest)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Per-destination message counts, for the `buffer` command.
    pub fn sizes(&self) -> HashMap<PeerId, usize> {
        self.queues
            .lock()
            .iter()
            .map(|(id, q)| (*id, q.len()))
            .collect()
    }
}

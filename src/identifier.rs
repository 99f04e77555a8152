//! Peer identifier derivation.
//!
//! [`derive_id`] is a deterministic Snowflake-style transform: a
//! monotonic millisecond timestamp in the high bits, a caller seed run
//! through a SplitMix64 avalanche mix in the low bits. Collisions are
//! resolved at handshake time (spec §4.5), not prevented here — this
//! only needs to be uniformly distributed enough that two independent
//! seeds rarely land on the same id in a small mesh.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A 64-bit peer identifier. Unique within a mesh by handshake
/// convention, never cryptographically authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u64);

impl PeerId {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(v: u64) -> Self {
        PeerId(v)
    }
}

/// SplitMix64 avalanche step, used to spread a caller-supplied seed
/// across the low bits before folding it with the timestamp.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Derive a peer id from a caller-supplied seed. Never returns 0.
pub fn derive_id(seed: u64) -> PeerId {
    let timestamp = now_millis() & 0x3F_FFFF_FFFF; // 42 bits, Snowflake-style
    let spread = splitmix64(seed) & 0x3F_FFFF; // 22 low bits
    let id = (timestamp << 22) | spread;
    PeerId(if id == 0 { 1 } else { id })
}

/// Draw a fresh seed from a system random source and derive an id from it.
pub fn fresh_random_id() -> PeerId {
    use rand::RngCore;
    let seed = rand::thread_rng().next_u64();
    derive_id(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_zero() {
        for seed in 0..1000u64 {
            assert_ne!(derive_id(seed).raw(), 0);
        }
    }

    #[test]
    fn distinct_seeds_rarely_collide() {
        let mut seen = std::collections::HashSet::new();
        for seed in 0..500u64 {
            seen.insert(derive_id(seed).raw());
        }
        // Same-millisecond calls share the timestamp bits, so uniqueness
        // rides entirely on the seed spread — expect no collisions here.
        assert_eq!(seen.len(), 500);
    }

    #[test]
    fn fresh_id_is_nonzero() {
        assert_ne!(fresh_random_id().raw(), 0);
    }
}

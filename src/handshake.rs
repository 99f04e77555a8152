//! The handshake protocol (spec §4.5) and the one-shot overlay gossip
//! it triggers on acceptance (spec §4.6).
//!
//! Both sides of the exchange run over the same connection; an
//! initiator that exhausts its retry budget simply stops and closes
//! the connection, which surfaces to the responder as a transport
//! error on its next read — there is no separate cap enforced on the
//! responder side. This mirrors the original's `Peer._send_handshake`
//! (`modules/lib/peer.py`), which recurses on the same socket rather
//! than reconnecting.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::{PeerError, Result};
use crate::framing;
use crate::identifier::{fresh_random_id, PeerId};
use crate::message::{Announcement, PeerMessage};
use crate::routing::RoutingEntry;
use crate::state::NodeState;

/// Initiator side (A -> B). Sends `HandshakeStart`, and on a
/// collision response regenerates this node's id and retries, up to
/// `state.handshake_attempts` total attempts.
pub async fn initiate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    state: &NodeState,
) -> Result<PeerId> {
    let max_attempts = state.handshake_attempts;
    for attempt in 1..=max_attempts {
        let my_id = state.self_id();
        framing::send(stream, PeerMessage::HandshakeStart { id: my_id }).await?;

        match framing::receive(stream).await? {
            PeerMessage::HandshakeResponse { id, error: false } => return Ok(id),
            PeerMessage::HandshakeResponse { error: true, .. } => {
                if attempt == max_attempts {
                    return Err(PeerError::HandshakeExhausted {
                        attempts: max_attempts,
                    });
                }
                state.set_self_id(fresh_random_id());
            }
            _ => {
                return Err(PeerError::ProtocolViolation {
                    expected: "HandshakeResponse",
                })
            }
        }
    }
    // Only reached when `max_attempts == 0`, which `1..=0` never
    // iterates. A library caller can build a `NodeState` with that
    // value directly (`config.rs` only guards the binary's own CLI
    // parsing), so this must be a normal error, not a panic.
    Err(PeerError::HandshakeExhausted {
        attempts: max_attempts,
    })
}

/// Responder side (B, on an accepted connection). Rejects an id that
/// collides with this node's own id or an existing routing-table
/// entry, without mutating the table; accepts otherwise and returns
/// the newcomer's (possibly retried) id.
pub async fn accept<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    state: &NodeState,
) -> Result<PeerId> {
    loop {
        let id = match framing::receive(stream).await? {
            PeerMessage::HandshakeStart { id } => id,
            _ => {
                return Err(PeerError::ProtocolViolation {
                    expected: "HandshakeStart",
                })
            }
        };

        let collides = id == state.self_id() || state.routing.contains(id);
        if collides {
            framing::send(
                stream,
                PeerMessage::HandshakeResponse {
                    id: PeerId(0),
                    error: true,
                },
            )
            .await?;
            continue;
        }

        framing::send(
            stream,
            PeerMessage::HandshakeResponse {
                id: state.self_id(),
                error: false,
            },
        )
        .await?;
        return Ok(id);
    }
}

/// Overlay gossip performed by the accepting side once a handshake
/// with `new_peer` has completed and its Direct entry is already in
/// the routing table (spec §4.6, step 1 and 2).
///
/// `new_peer_conn` is that Direct entry's sender; passed explicitly
/// rather than re-resolved so this never races a concurrent removal.
pub async fn gossip_on_join(
    state: &NodeState,
    new_peer: PeerId,
    new_peer_conn: &mpsc::Sender<PeerMessage>,
) {
    let self_id = state.self_id();
    let snapshot = state.routing.snapshot();

    // 1. Teach the newcomer about every other peer we know, reachable via us.
    for (id, _) in &snapshot {
        if *id == new_peer {
            continue;
        }
        let ann = PeerMessage::Announcement(Announcement::Join {
            id: *id,
            via_id: self_id,
        });
        if new_peer_conn.send(ann).await.is_err() {
            tracing::warn!(peer = %new_peer, "new peer disconnected before routing table could be seeded");
            return;
        }
    }

    // 2. Tell every other directly-connected peer that the newcomer joined via us.
    let ann = PeerMessage::Announcement(Announcement::Join {
        id: new_peer,
        via_id: self_id,
    });
    for (id, entry) in &snapshot {
        if *id == new_peer {
            continue;
        }
        if let RoutingEntry::Direct { conn } = entry {
            if conn.send(ann.clone()).await.is_err() {
                tracing::warn!(peer = %id, "failed to notify peer of new join, likely disconnecting");
            }
        }
    }
}

/// Broadcast LEAVE to all remaining directly-connected peers after
/// `departed` has been removed from the routing table (spec §4.6,
/// worker teardown case).
pub async fn gossip_on_leave(state: &NodeState, departed: PeerId) {
    let ann = PeerMessage::Announcement(Announcement::Leave { id: departed });
    for (id, entry) in state.routing.snapshot() {
        if id == departed {
            continue;
        }
        if let RoutingEntry::Direct { conn } = entry {
            if conn.send(ann.clone()).await.is_err() {
                tracing::warn!(peer = %id, "failed to notify peer of departure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_id(id: u64) -> NodeState {
        NodeState::new(PeerId(id), 10, 3)
    }

    #[tokio::test]
    async fn zero_attempts_is_an_error_not_a_panic() {
        let state = NodeState::new(PeerId(1), 10, 0);
        let (mut a, _b) = tokio::io::duplex(4096);
        let err = initiate(&mut a, &state).await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::HandshakeExhausted { attempts: 0 }
        ));
    }

    #[tokio::test]
    async fn collision_is_rejected_without_mutating_table() {
        let responder_state = state_with_id(100);
        let (tx, _rx) = mpsc::channel(8);
        responder_state.routing.add_direct(PeerId(200), tx);

        let (mut a, mut b) = tokio::io::duplex(4096);
        let initiator_state = state_with_id(200); // collides with B's existing entry

        let (init_result, accept_result) = tokio::join!(
            initiate(&mut a, &initiator_state),
            accept(&mut b, &responder_state)
        );

        // B rejected once, then the initiator's single remaining
        // attempt (attempts=3, one burned on the collision) used a
        // fresh id and should succeed.
        assert!(init_result.is_ok());
        assert!(accept_result.is_ok());
        assert_ne!(init_result.unwrap(), PeerId(200));
        assert_eq!(responder_state.routing.len(), 1); // only the pre-seeded entry
    }

    #[tokio::test]
    async fn retry_converges_within_attempt_cap() {
        let responder_state = state_with_id(1); // pretend B already owns id=1
        let initiator_state = state_with_id(1); // A starts with a colliding id

        let (mut a, mut b) = tokio::io::duplex(4096);
        let (init_result, accept_result) =
            tokio::join!(initiate(&mut a, &initiator_state), accept(&mut b, &responder_state));

        let a_final = init_result.unwrap();
        let b_seen = accept_result.unwrap();
        assert_ne!(a_final, PeerId(1));
        assert_eq!(a_final, b_seen);
    }

    #[tokio::test]
    async fn unexpected_message_during_handshake_is_protocol_violation() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let state = state_with_id(1);
        framing::send(
            &mut a,
            PeerMessage::Message {
                from: PeerId(1),
                to: PeerId(2),
                text: "not a handshake".into(),
            },
        )
        .await
        .unwrap();
        let err = accept(&mut b, &state).await.unwrap_err();
        assert!(matches!(err, PeerError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn gossip_seeds_newcomer_and_notifies_existing_peers() {
        let state = state_with_id(999); // B
        let (p1_tx, mut p1_rx) = mpsc::channel(8);
        let (p2_tx, mut p2_rx) = mpsc::channel(8);
        let (new_tx, mut new_rx) = mpsc::channel(8);

        state.routing.add_direct(PeerId(1), p1_tx);
        state.routing.add_direct(PeerId(2), p2_tx);
        state.routing.add_direct(PeerId(3), new_tx.clone());

        gossip_on_join(&state, PeerId(3), &new_tx).await;

        let mut seeded = vec![];
        while let Ok(msg) = new_rx.try_recv() {
            seeded.push(msg);
        }
        assert_eq!(seeded.len(), 2);
        for msg in seeded {
            match msg {
                PeerMessage::Announcement(Announcement::Join { id, via_id }) => {
                    assert!(id == PeerId(1) || id == PeerId(2));
                    assert_eq!(via_id, PeerId(999));
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }

        let p1_msg = p1_rx.try_recv().unwrap();
        match p1_msg {
            PeerMessage::Announcement(Announcement::Join { id, via_id }) => {
                assert_eq!(id, PeerId(3));
                assert_eq!(via_id, PeerId(999));
            }
            other => panic!("unexpected message: {other:?}"),
        }
        let p2_msg = p2_rx.try_recv().unwrap();
        assert!(matches!(
            p2_msg,
            PeerMessage::Announcement(Announcement::Join { id, .. }) if id == PeerId(3)
        ));
        // The newcomer itself never receives a JOIN about itself.
        assert!(new_rx.try_recv().is_err());
    }
}

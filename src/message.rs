//! Idiomatic message types layered over the protobuf wire schema.
//!
//! `wire` is the prost-generated module (see `build.rs` /
//! `proto/peer.proto`); everything else in this file is a thin,
//! hand-written translation to and from the [`PeerMessage`] enum the
//! rest of the crate actually works with. The framing adapter
//! (`framing.rs`) is the only place that touches `wire` directly.

use crate::error::{PeerError, Result};
use crate::identifier::PeerId;

mod wire {
    include!(concat!(env!("OUT_DIR"), "/peerlink.rs"));
}

/// A JOIN or LEAVE overlay announcement (spec §3, §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Join { id: PeerId, via_id: PeerId },
    Leave { id: PeerId },
}

/// The four-variant discriminated union carried over the wire (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    HandshakeStart {
        id: PeerId,
    },
    HandshakeResponse {
        id: PeerId,
        error: bool,
    },
    Message {
        from: PeerId,
        to: PeerId,
        text: String,
    },
    Announcement(Announcement),
}

impl PeerMessage {
    /// Name used in protocol-violation log messages and errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            PeerMessage::HandshakeStart { .. } => "HandshakeStart",
            PeerMessage::HandshakeResponse { .. } => "HandshakeResponse",
            PeerMessage::Message { .. } => "Message",
            PeerMessage::Announcement(_) => "Announcement",
        }
    }

    pub(crate) fn into_wire(self) -> wire::PeerMessage {
        let payload = match self {
            PeerMessage::HandshakeStart { id } => {
                wire::peer_message::Payload::HandshakeStart(wire::HandshakeStart { id: id.raw() })
            }
            PeerMessage::HandshakeResponse { id, error } => {
                wire::peer_message::Payload::HandshakeResponse(wire::HandshakeResponse {
                    id: id.raw(),
                    error,
                })
            }
            PeerMessage::Message { from, to, text } => {
                wire::peer_message::Payload::Message(wire::Message {
                    from: from.raw(),
                    to: to.raw(),
                    text,
                })
            }
            PeerMessage::Announcement(Announcement::Join { id, via_id }) => {
                wire::peer_message::Payload::Announcement(wire::Announcement {
                    kind: wire::AnnouncementKind::Join as i32,
                    join: Some(wire::Join {
                        id: id.raw(),
                        via_id: via_id.raw(),
                    }),
                    leave: None,
                })
            }
            PeerMessage::Announcement(Announcement::Leave { id }) => {
                wire::peer_message::Payload::Announcement(wire::Announcement {
                    kind: wire::AnnouncementKind::Leave as i32,
                    join: None,
                    leave: Some(wire::Leave { id: id.raw() }),
                })
            }
        };
        wire::PeerMessage {
            payload: Some(payload),
        }
    }

    pub(crate) fn from_wire(msg: wire::PeerMessage) -> Result<Self> {
        use wire::peer_message::Payload;
        let payload = msg.payload.ok_or(PeerError::ProtocolViolation {
            expected: "a populated PeerMessage payload",
        })?;
        Ok(match payload {
            Payload::HandshakeStart(h) => PeerMessage::HandshakeStart { id: h.id.into() },
            Payload::HandshakeResponse(h) => PeerMessage::HandshakeResponse {
                id: h.id.into(),
                error: h.error,
            },
            Payload::Message(m) => PeerMessage::Message {
                from: m.from.into(),
                to: m.to.into(),
                text: m.text,
            },
            Payload::Announcement(a) => {
                let kind = wire::AnnouncementKind::try_from(a.kind).unwrap_or(wire::AnnouncementKind::Join);
                match kind {
                    wire::AnnouncementKind::Join => {
                        let join = a.join.ok_or(PeerError::ProtocolViolation {
                            expected: "Announcement.join for kind=JOIN",
                        })?;
                        PeerMessage::Announcement(Announcement::Join {
                            id: join.id.into(),
                            via_id: join.via_id.into(),
                        })
                    }
                    wire::AnnouncementKind::Leave => {
                        let leave = a.leave.ok_or(PeerError::ProtocolViolation {
                            expected: "Announcement.leave for kind=LEAVE",
                        })?;
                        PeerMessage::Announcement(Announcement::Leave {
                            id: leave.id.into(),
                        })
                    }
                }
            }
        })
    }

    pub(crate) fn encode_to_vec(self) -> Vec<u8> {
        use prost::Message as _;
        self.into_wire().encode_to_vec()
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self> {
        use prost::Message as _;
        let wire = wire::PeerMessage::decode(buf)
            .map_err(|e| PeerError::Transport(format!("malformed payload: {e}")))?;
        Self::from_wire(wire)
    }
}

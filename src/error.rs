//! Typed errors at the protocol boundaries.
//!
//! Worker-local errors (everything but [`PeerError::Validation`]) never
//! terminate the node; they end the affected worker or retry attempt.
//! Only a [`PeerError::Validation`] at startup is fatal to the process.

use crate::identifier::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("invalid argument: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed by peer during size reception")]
    ConnectionClosed,

    #[error("incomplete message received")]
    IncompleteMessage,

    #[error("protocol violation: expected {expected}, got something else")]
    ProtocolViolation { expected: &'static str },

    #[error("handshake exhausted after {attempts} attempt(s)")]
    HandshakeExhausted { attempts: u8 },

    #[error("no route to peer {0}")]
    NoRoute(PeerId),

    #[error("connection limit reached, closing new connection")]
    ConnectionLimit,
}

pub type Result<T> = std::result::Result<T, PeerError>;

//! A decentralized peer-to-peer chat overlay node.
//!
//! See `main.rs` for the binary entry point; this crate is organized
//! the way the original's module tree was, one file per concern: wire
//! format (`message`, `framing`), identity (`identifier`), topology
//! (`routing`, `buffer`), connection lifecycle (`handshake`, `worker`,
//! `listener`), and the user-facing surface (`config`, `controller`).

pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod identifier;
pub mod listener;
pub mod message;
pub mod routing;
pub mod state;
pub mod worker;

//! CLI parsing and validation (spec §6).
//!
//! `clap`'s derive macro handles flag syntax and help text the way
//! `freeq-bots/src/main.rs`'s `#[derive(Parser)] struct Args` does;
//! the `ip:port` shape and range checks it cannot express
//! declaratively are validated by hand afterwards, mirroring the
//! original's `modules/lib/args.py::_validate_args`.

use std::net::Ipv4Addr;

use clap::{Parser, ValueEnum};

use crate::error::{PeerError, Result};
use crate::identifier::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl PeerAddr {
    pub fn socket_addr(self) -> std::net::SocketAddrV4 {
        std::net::SocketAddrV4::new(self.ip, self.port)
    }
}

fn parse_addr(field: &'static str, raw: &str) -> Result<PeerAddr> {
    let (ip_part, port_part) = raw.split_once(':').ok_or_else(|| PeerError::Validation {
        field: field.into(),
        message: format!("invalid address format: '{raw}'. Expected [ip]:[port]"),
    })?;

    let ip: Ipv4Addr = ip_part.parse().map_err(|_| PeerError::Validation {
        field: field.into(),
        message: format!("invalid IPv4 address: '{ip_part}'"),
    })?;

    let port: u16 = port_part.parse().map_err(|_| PeerError::Validation {
        field: field.into(),
        message: format!("invalid port number: '{port_part}'"),
    })?;
    if port == 0 {
        return Err(PeerError::Validation {
            field: field.into(),
            message: format!("invalid port number: '{port_part}'. Port should be in 1..=65535"),
        });
    }

    Ok(PeerAddr { ip, port })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_possible_value()
            .expect("LogLevel has no skipped variants")
            .get_name()
            .fmt(f)
    }
}

impl LogLevel {
    /// The `tracing`-compatible level name this directive maps to.
    /// CRITICAL has no tracing equivalent, so it folds into ERROR.
    pub fn as_tracing_level(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// `peerlink <local_ip:port> [peer_ip:port] [--desired-id ID] [--log-level LEVEL]`
#[derive(Parser, Debug)]
#[command(name = "peerlink", about = "Decentralized peer-to-peer chat overlay node")]
pub struct RawArgs {
    /// Your IP and port, in the format ip:port.
    local_address: String,

    /// Optional bootstrap peer address, in the format ip:port.
    peer_address: Option<String>,

    /// An optional fixed peer id; a random one is derived if omitted.
    #[arg(long)]
    desired_id: Option<u64>,

    /// Logging verbosity.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Maximum number of simultaneously accepted inbound connections.
    #[arg(long, default_value_t = 10)]
    connection_cap: usize,

    /// Maximum number of id-collision retries during an outbound handshake.
    #[arg(long, default_value_t = 3)]
    handshake_attempts: u8,
}

pub struct Config {
    pub local: PeerAddr,
    pub peer: Option<PeerAddr>,
    pub desired_id: Option<PeerId>,
    pub log_level: LogLevel,
    pub connection_cap: usize,
    pub handshake_attempts: u8,
}

impl Config {
    /// Parse and validate `args` (excluding argv[0]).
    pub fn parse_from<I, T>(args: I) -> Result<Config>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let raw = RawArgs::try_parse_from(args).map_err(|e| PeerError::Validation {
            field: "args".into(),
            message: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawArgs) -> Result<Config> {
        let local = parse_addr("local_address", &raw.local_address)?;
        let peer = raw
            .peer_address
            .as_deref()
            .map(|addr| parse_addr("peer_address", addr))
            .transpose()?;

        if raw.handshake_attempts == 0 {
            return Err(PeerError::Validation {
                field: "handshake_attempts".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Config {
            local,
            peer,
            desired_id: raw.desired_id.map(PeerId),
            log_level: raw.log_level,
            connection_cap: raw.connection_cap,
            handshake_attempts: raw.handshake_attempts,
        })
    }
}

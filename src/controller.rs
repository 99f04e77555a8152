//! The node controller: wires up the listener and an optional
//! bootstrap connection, then runs the interactive command loop
//! (spec §4.9 "Node controller", §6 "Interactive commands").
//!
//! Grounded on `modules/lib/input.py::read_command` for the command
//! grammar (case-insensitive keywords, `<id> <text>` fallback) and on
//! `freeq-server`'s pattern of bridging a blocking stdin reader into
//! the async world with `spawn_blocking` + a channel.

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::handshake;
use crate::identifier::PeerId;
use crate::listener;
use crate::message::PeerMessage;
use crate::routing::RoutingEntry;
use crate::state::NodeState;
use crate::worker::{self, Role};

/// Grace period given to in-flight workers to observe the exit flag
/// and finish Teardown before the controller returns. Comfortably
/// above the workers' own ~1s poll interval.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(1500);

/// Bind `local_addr`, optionally dial `bootstrap`, then run the
/// command loop until `end` or stdin EOF.
pub async fn run(
    local_addr: SocketAddrV4,
    bootstrap: Option<SocketAddrV4>,
    state: Arc<NodeState>,
) -> anyhow::Result<()> {
    let tcp = TcpListener::bind(local_addr)
        .await
        .with_context(|| format!("binding {local_addr}"))?;
    tracing::info!(%local_addr, "listening");

    let listener_task = tokio::spawn(listener::run(tcp, state.clone()));

    if let Some(peer_addr) = bootstrap {
        connect_bootstrap(peer_addr, &state).await?;
    }

    run_command_loop(&state).await;

    state.request_exit();
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    listener_task.abort();
    tracing::info!("shutdown complete");
    Ok(())
}

/// Dial `peer_addr`, complete the initiator handshake, and hand the
/// established connection to a listen-only client worker.
pub async fn connect_bootstrap(
    peer_addr: SocketAddrV4,
    state: &Arc<NodeState>,
) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(peer_addr)
        .await
        .with_context(|| format!("connecting to bootstrap peer {peer_addr}"))?;

    let peer_id = handshake::initiate(&mut stream, state)
        .await
        .with_context(|| format!("handshake with bootstrap peer {peer_addr} failed"))?;

    tracing::info!(%peer_addr, peer = %peer_id, "joined mesh via bootstrap peer");
    let state = state.clone();
    tokio::spawn(async move {
        worker::run(stream, Role::Client { peer_id }, state).await;
    });
    Ok(())
}

async fn run_command_loop(state: &NodeState) {
    let mut lines = spawn_stdin_reader();
    loop {
        if state.is_exiting() {
            return;
        }
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::time::sleep(Duration::from_millis(250)) => continue,
        };
        match line {
            Some(line) => {
                if !handle_command(&line, state).await {
                    return;
                }
            }
            None => return, // stdin closed
        }
    }
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::task::spawn_blocking(move || {
        use std::io::BufRead;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

/// Process one line of input. Returns `false` when the controller
/// should shut down.
async fn handle_command(line: &str, state: &NodeState) -> bool {
    let trimmed = line.trim();
    match trimmed.to_lowercase().as_str() {
        "end" => return false,
        "" => return true,
        "table" => {
            print_table(state);
            return true;
        }
        "buffer" => {
            print_buffer(state);
            return true;
        }
        _ => {}
    }

    match parse_send(trimmed) {
        Some((to, text)) => send_local(state, to, text).await,
        None => eprintln!("invalid command: expected 'end', 'table', 'buffer', or '<id> <text>'"),
    }
    true
}

fn parse_send(input: &str) -> Option<(PeerId, String)> {
    let (id_part, text) = input.split_once(' ')?;
    let id: u64 = id_part.parse().ok()?;
    Some((PeerId(id), text.to_string()))
}

fn print_table(state: &NodeState) {
    println!("id\tdirect\tvia");
    for (id, entry) in state.routing.snapshot() {
        match entry {
            RoutingEntry::Direct { .. } => println!("{id}\tyes\t-"),
            RoutingEntry::Remote { via } => println!("{id}\tno\t{via}"),
        }
    }
}

fn print_buffer(state: &NodeState) {
    for (id, count) in state.pending.sizes() {
        println!("{id}\t{count}");
    }
}

/// Send text typed at the controller to `to`. The controller never
/// lets a locally-produced message address this node itself. Public
/// so tests can drive a send without going through stdin.
pub async fn send_local(state: &NodeState, to: PeerId, text: String) {
    if to == state.self_id() {
        eprintln!("cannot address a message to yourself");
        return;
    }
    let msg = PeerMessage::Message {
        from: state.self_id(),
        to,
        text,
    };
    worker::route_message(state, msg, to).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> NodeState {
        NodeState::new(PeerId(1), 10, 3)
    }

    #[test]
    fn parse_send_splits_on_first_space_only() {
        let (id, text) = parse_send("42 hello there friend").unwrap();
        assert_eq!(id, PeerId(42));
        assert_eq!(text, "hello there friend");
    }

    #[test]
    fn parse_send_rejects_non_numeric_id() {
        assert!(parse_send("abc hi").is_none());
    }

    #[test]
    fn parse_send_rejects_missing_text() {
        assert!(parse_send("42").is_none());
    }

    #[tokio::test]
    async fn end_command_signals_shutdown() {
        let st = state();
        assert!(!handle_command("END", &st).await);
        assert!(!handle_command("  end  ", &st).await);
    }

    #[tokio::test]
    async fn blank_and_unknown_keywords_keep_running() {
        let st = state();
        assert!(handle_command("", &st).await);
        assert!(handle_command("table", &st).await);
        assert!(handle_command("buffer", &st).await);
    }

    #[tokio::test]
    async fn send_to_self_is_rejected_without_enqueueing() {
        let st = state();
        send_local(&st, PeerId(1), "hi".into()).await;
        assert!(st.pending.sizes().is_empty());
    }

    #[tokio::test]
    async fn send_to_unknown_peer_is_buffered() {
        let st = state();
        handle_command("7 hello", &st).await;
        assert_eq!(st.pending.sizes().get(&PeerId(7)), Some(&1));
    }
}

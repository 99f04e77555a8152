//! The inbound connection acceptor (spec §4.8).
//!
//! Connections beyond `state.connection_cap` are closed immediately,
//! without a worker ever being spawned for them — mirroring
//! `modules/lib/server.py`'s check against `MAX_CONNECTIONS` before
//! handing a socket off to a new `PeerServerWorker`.

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::error::PeerError;
use crate::state::NodeState;
use crate::worker::{self, Role};

/// Accept connections on `listener` until the node's exit flag is set.
/// Each accepted connection is handed to its own [`worker::run`] task.
pub async fn run(listener: TcpListener, state: Arc<NodeState>) {
    loop {
        if state.is_exiting() {
            return;
        }

        let accepted =
            tokio::time::timeout(std::time::Duration::from_secs(1), listener.accept()).await;

        let (stream, addr) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed to accept inbound connection");
                continue;
            }
            Err(_elapsed) => continue,
        };

        if !state.try_acquire_inbound_slot() {
            tracing::warn!(%addr, error = %PeerError::ConnectionLimit, "rejecting inbound connection");
            drop(stream);
            continue;
        }

        tracing::info!(%addr, "accepted inbound connection");
        let state = state.clone();
        tokio::spawn(async move {
            worker::run(stream, Role::Server, state.clone()).await;
            state.release_inbound_slot();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::PeerId;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn over_cap_connection_is_closed_without_a_worker() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let state = Arc::new(NodeState::new(PeerId(1), 0, 3));

        let accept_task = tokio::spawn(run(tcp, state.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        // The peer closing its end is the only observable signal here,
        // since a rejected connection never completes a handshake.
        let mut buf = [0u8; 1];
        use tokio::io::AsyncReadExt;
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        state.request_exit();
        let _ = accept_task.await;
    }
}

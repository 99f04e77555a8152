//! Binary entry point: parse arguments, initialize logging, build the
//! node state, and hand off to the controller (spec §6).

use std::process::ExitCode;
use std::sync::Arc;

use peerlink::config::Config;
use peerlink::identifier::fresh_random_id;
use peerlink::state::NodeState;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let config = match Config::parse_from(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(format!(
            "peerlink={}",
            config.log_level.as_tracing_level()
        )))
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config))
}

async fn run(config: Config) -> ExitCode {
    let initial_id = config.desired_id.unwrap_or_else(fresh_random_id);

    let state = Arc::new(NodeState::new(
        initial_id,
        config.connection_cap,
        config.handshake_attempts,
    ));
    tracing::info!(id = %initial_id, "starting node");

    let outcome = peerlink::controller::run(
        config.local.socket_addr(),
        config.peer.map(|p| p.socket_addr()),
        state,
    )
    .await;

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

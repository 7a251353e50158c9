//! Inbound I2P accept loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionDirection};
use crate::error::{NetworkError, NetworkResult};
use crate::peers::PeerAddr;
use crate::state::State;

use super::sam::{expect_ok, SamStream};

/// Runs the accept loop: one SAM socket per pending accept, replaced as
/// soon as a connection lands on it. Short reply waits keep shutdown
/// responsive.
pub fn spawn(state: Arc<State>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while !state.shutting_down() {
            match accept_one(&state).await {
                Ok(()) => {}
                Err(e) => {
                    debug!("i2p accept failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!("i2p listener shut down");
    })
}

async fn accept_one(state: &Arc<State>) -> NetworkResult<()> {
    let nick = state
        .i2p_session
        .read()
        .as_ref()
        .map(|s| s.nick.clone())
        .ok_or_else(|| NetworkError::sam("no session"))?;
    let config = &state.config.i2p;

    let mut sam = SamStream::connect(&config.sam_host, config.sam_port).await?;
    sam.hello().await?;
    sam.send_line(&format!("STREAM ACCEPT ID={}\n", nick)).await?;
    let reply = sam.read_line(Duration::from_secs(10)).await?;
    expect_ok(&reply)?;

    // Block for the next inbound stream; the first line names the remote
    // destination. Poll in 1 s slices so the shutdown flag stays live.
    let destination = loop {
        if state.shutting_down() {
            return Ok(());
        }
        match sam.read_line(Duration::from_secs(1)).await {
            Ok(line) => {
                break line
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string()
            }
            Err(NetworkError::Sam { reason }) if reason.contains("timed out") => continue,
            Err(e) => return Err(e),
        }
    };
    if destination.is_empty() {
        return Err(NetworkError::sam("empty destination line"));
    }

    let peer = PeerAddr::i2p(destination);
    info!("incoming i2p connection from {}", peer);

    if state.group_already_connected(&peer.network_group(), 0) {
        warn!("rejecting duplicate i2p connection from {}", peer);
        return Ok(());
    }
    if state.connection_count() >= state.config.connection_limit {
        info!("connection limit reached, dropping {}", peer);
        return Ok(());
    }

    let (stream, leftover) = sam.into_parts();
    let handle = Connection::spawn_with_stream(
        state.clone(),
        peer,
        ConnectionDirection::Inbound,
        stream,
        leftover,
    );
    state.register_connection(handle);
    Ok(())
}

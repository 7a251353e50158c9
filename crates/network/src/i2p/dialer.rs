//! Outbound I2P dials.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::connection::{Connection, ConnectionDirection};
use crate::error::NetworkResult;
use crate::peers::PeerAddr;
use crate::state::{DialerHandle, State};

use super::sam::{expect_ok, SamStream};

/// Spawns a dial attempt towards `destination`. On success the SAM socket
/// becomes an outbound connection worker; on failure the task simply ends
/// and the manager sweeps the handle away.
pub fn spawn(state: Arc<State>, destination: String) -> DialerHandle {
    let peer = PeerAddr::i2p(destination.clone());
    let handle_peer = peer.clone();
    let task = tokio::spawn(async move {
        match dial(&state, &destination).await {
            Ok(sam) => {
                if state.shutting_down() {
                    return;
                }
                let (stream, leftover) = sam.into_parts();
                let handle = Connection::spawn_with_stream(
                    state.clone(),
                    peer,
                    ConnectionDirection::Outbound,
                    stream,
                    leftover,
                );
                state.register_connection(handle);
            }
            Err(e) => debug!("i2p dial to {} failed: {}", peer, e),
        }
    });
    DialerHandle::new(handle_peer, task)
}

async fn dial(state: &State, destination: &str) -> NetworkResult<SamStream> {
    let nick = state
        .i2p_session
        .read()
        .as_ref()
        .map(|s| s.nick.clone())
        .ok_or_else(|| crate::error::NetworkError::sam("no session"))?;
    let config = &state.config.i2p;
    let mut sam = SamStream::connect(&config.sam_host, config.sam_port).await?;
    sam.hello().await?;
    sam.send_line(&format!(
        "STREAM CONNECT ID={} DESTINATION={}\n",
        nick, destination
    ))
    .await?;
    let reply = sam.read_line(Duration::from_secs(60)).await?;
    expect_ok(&reply)?;
    Ok(sam)
}

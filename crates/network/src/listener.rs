//! TCP accept loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::connection::{Connection, ConnectionDirection};
use crate::peers::PeerAddr;
use crate::state::State;

/// Binds the listening socket and spawns the accept loop, returning the
/// bound address. Accepted sockets become inbound connection workers;
/// the worker itself enforces the duplicate-group rule before reaching
/// `fully_established`.
pub async fn spawn(
    state: Arc<State>,
) -> std::io::Result<(JoinHandle<()>, std::net::SocketAddr)> {
    let listener = TcpListener::bind(("0.0.0.0", state.config.listen_port)).await?;
    let local_addr = listener.local_addr()?;
    info!("listening for connections on port {}", local_addr.port());

    let task = tokio::spawn(async move {
        loop {
            if state.shutting_down() {
                break;
            }
            // Bounded wait so shutdown stays responsive
            let accepted = match timeout(Duration::from_secs(1), listener.accept()).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    warn!("failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                Err(_) => continue,
            };
            let (stream, addr) = accepted;

            if state.connection_count() >= state.config.connection_limit {
                info!("connection limit reached, dropping {}", addr);
                continue;
            }

            let remote = PeerAddr::ip(addr.ip().to_string(), addr.port());
            info!("incoming connection from {}", remote);
            let handle = Connection::spawn_with_stream(
                state.clone(),
                remote,
                ConnectionDirection::Inbound,
                stream,
                Vec::new(),
            );
            state.register_connection(handle);
        }
        info!("listener shut down");
    });
    Ok((task, local_addr))
}

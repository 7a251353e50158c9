//! Per-peer connection worker.
//!
//! One tokio task per connection. The worker owns its socket exclusively,
//! frames and processes messages strictly in arrival order, and reaches
//! shared state only through the `Arc<State>` it was constructed with.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::unix_now;
use crate::error::{NetworkError, NetworkResult};
use crate::messages::{
    address::parse_host, header::HEADER_LEN, ErrorPayload, Message, MessageHeader, NetAddr,
    Payload, Vector, VersionPayload,
};
use crate::peers::PeerAddr;
use crate::pools::PeerPools;
use crate::state::{ConnectionHandle, State};

/// How long a dial may take before the connection is marked failed
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-iteration socket read timeout; also the periodic-work cadence
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// A handshake must complete within this window
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Quiet time before a keepalive ping goes out
const PING_INTERVAL: Duration = Duration::from_secs(60);

/// Quiet time before the connection is considered dead
const IDLE_TIMEOUT: Duration = Duration::from_secs(180);

/// Vectors requested but unanswered are re-queued after this long
const REQUEST_RETRY: Duration = Duration::from_secs(120);

/// Most vectors moved into one `getdata`
const GETDATA_BATCH: usize = 64;

/// Most vectors gossiped in one `inv`
const INV_BATCH: usize = 10_000;

/// Most peers shared in the post-handshake `addr`
const ADDR_SAMPLE: usize = 1000;

/// A peer requesting more vectors than this in one `getdata` is banned
const MAX_GETDATA_VECTORS: usize = 50_000;

/// Ban duration handed out on protocol violations, in seconds
const BAN_SECONDS: u64 = 3600;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dial in progress
    Connecting,
    /// Socket open, handshake not finished
    Connected,
    /// Handshake complete, gossiping
    FullyEstablished,
    /// Winding down, draining writes
    Disconnecting,
    /// Socket closed
    Disconnected,
    /// Never reached the established state
    Failed,
}

impl ConnectionState {
    /// True once the connection can never carry traffic again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::FullyEstablished => "fully_established",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Who opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    Outbound,
    Inbound,
}

/// What the peer told us about itself during the handshake.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub services: u64,
    pub user_agent: Vec<u8>,
    pub streams: Vec<u64>,
}

/// The worker side of a connection.
pub struct Connection {
    id: u64,
    state: Arc<State>,
    remote: PeerAddr,
    direction: ConnectionDirection,
    /// Harvest a single `addr` and leave
    bootstrap: bool,
    status: Arc<Mutex<ConnectionState>>,
    stop: Arc<AtomicBool>,
    announce_rx: mpsc::UnboundedReceiver<Vector>,
    stream: Option<TcpStream>,
    buf: Vec<u8>,
    peer: Arc<Mutex<Option<PeerInfo>>>,
    version_received: bool,
    verack_received: bool,
    fully_established: bool,
    disconnect_requested: bool,
    vectors_to_get: HashSet<Vector>,
    vectors_requested: HashMap<Vector, Instant>,
    vectors_to_send: HashSet<Vector>,
    started: Instant,
    last_received: Instant,
    last_ping: Instant,
}

impl Connection {
    /// Spawns an outbound worker that dials `remote` over TCP.
    pub fn spawn_outbound(state: Arc<State>, remote: PeerAddr, bootstrap: bool) -> ConnectionHandle {
        Self::spawn(
            state,
            remote,
            ConnectionDirection::Outbound,
            None,
            Vec::new(),
            bootstrap,
        )
    }

    /// Spawns a worker over an already-open stream: an accepted TCP
    /// socket, or a SAM socket past `STREAM CONNECT`/`STREAM ACCEPT`
    /// (with any bytes that followed the SAM reply in `initial_buf`).
    pub fn spawn_with_stream(
        state: Arc<State>,
        remote: PeerAddr,
        direction: ConnectionDirection,
        stream: TcpStream,
        initial_buf: Vec<u8>,
    ) -> ConnectionHandle {
        Self::spawn(state, remote, direction, Some(stream), initial_buf, false)
    }

    fn spawn(
        state: Arc<State>,
        remote: PeerAddr,
        direction: ConnectionDirection,
        stream: Option<TcpStream>,
        initial_buf: Vec<u8>,
        bootstrap: bool,
    ) -> ConnectionHandle {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let initial = if stream.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Connecting
        };
        let status = Arc::new(Mutex::new(initial));
        let stop = Arc::new(AtomicBool::new(false));
        let peer = Arc::new(Mutex::new(None));
        let (announce_tx, announce_rx) = mpsc::unbounded_channel();

        let now = Instant::now();
        let worker = Connection {
            id,
            state: state.clone(),
            remote: remote.clone(),
            direction,
            bootstrap,
            status: status.clone(),
            stop: stop.clone(),
            announce_rx,
            stream,
            buf: initial_buf,
            peer: peer.clone(),
            version_received: false,
            verack_received: false,
            fully_established: false,
            disconnect_requested: false,
            vectors_to_get: HashSet::new(),
            vectors_requested: HashMap::new(),
            vectors_to_send: HashSet::new(),
            started: now,
            last_received: now,
            last_ping: now,
        };
        let task = tokio::spawn(worker.run());

        ConnectionHandle::new(id, remote, direction, status, stop, peer, announce_tx, task)
    }

    fn set_status(&self, status: ConnectionState) {
        *self.status.lock() = status;
        debug!("connection {} is now {}", self.remote, status);
    }

    async fn run(mut self) {
        let result = self.drive().await;
        match &result {
            Ok(()) => info!("connection {} closed", self.remote),
            Err(e) if e.is_protocol_error() => {
                warn!("connection {} violated protocol: {}", self.remote, e);
                let reply = Payload::Error(ErrorPayload::fatal(e.to_string(), BAN_SECONDS));
                let _ = self.send(&reply).await;
                self.state
                    .pools
                    .write()
                    .ban(self.remote.clone(), unix_now() + BAN_SECONDS);
            }
            Err(NetworkError::RemoteFatal { text }) => {
                warn!("connection {} sent fatal error: {}", self.remote, text);
            }
            Err(e) => debug!("connection {} transport error: {}", self.remote, e),
        }

        self.set_status(ConnectionState::Disconnecting);
        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.flush().await;
            let _ = stream.shutdown().await;
        }
        let terminal = if result.is_err() && !self.fully_established {
            ConnectionState::Failed
        } else {
            ConnectionState::Disconnected
        };
        self.set_status(terminal);
    }

    async fn drive(&mut self) -> NetworkResult<()> {
        if self.stream.is_none() {
            self.connect().await?;
        }
        self.set_status(ConnectionState::Connected);
        if self.direction == ConnectionDirection::Outbound {
            self.send_version().await?;
        }

        loop {
            if self.state.shutting_down()
                || self.stop.load(Ordering::Relaxed)
                || self.disconnect_requested
            {
                return Ok(());
            }

            let mut chunk = [0u8; 4096];
            let Some(stream) = self.stream.as_mut() else {
                return Err(NetworkError::resource("stream lost"));
            };
            match timeout(READ_TIMEOUT, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(NetworkError::Transport(std::io::Error::from(
                        std::io::ErrorKind::UnexpectedEof,
                    )))
                }
                Ok(Ok(n)) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    self.last_received = Instant::now();
                    self.process_buffer().await?;
                }
                Ok(Err(e)) => return Err(NetworkError::Transport(e)),
                Err(_) => {} // read timeout, fall through to periodic work
            }

            self.periodic().await?;
        }
    }

    /// Establishes the TCP socket for an outbound dial.
    async fn connect(&mut self) -> NetworkResult<()> {
        let PeerAddr::Ip { host, port } = self.remote.clone() else {
            return Err(NetworkError::sam("i2p connections need a dialed stream"));
        };
        debug!("connecting to {}:{}", host, port);
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| {
                NetworkError::Transport(std::io::Error::from(std::io::ErrorKind::TimedOut))
            })?
            .map_err(NetworkError::Transport)?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Extracts and handles every complete frame in the buffer.
    async fn process_buffer(&mut self) -> NetworkResult<()> {
        loop {
            if self.buf.len() < HEADER_LEN {
                return Ok(());
            }
            let header = MessageHeader::from_bytes(&self.buf, self.state.config.magic)?;
            let total = HEADER_LEN + header.length as usize;
            if self.buf.len() < total {
                return Ok(());
            }
            let frame: Vec<u8> = self.buf.drain(..total).collect();
            let message = Message::from_bytes(&frame, self.state.config.magic)?;
            debug!(
                "received {} from {} ({} bytes)",
                message.header.command,
                self.remote,
                message.payload.len()
            );
            if let crate::messages::Command::Unknown(name) = &message.header.command {
                debug!("ignoring unknown command {} from {}", name, self.remote);
                continue;
            }
            let payload = message.decode()?;
            self.handle_payload(payload).await?;
        }
    }

    async fn handle_payload(&mut self, payload: Payload) -> NetworkResult<()> {
        match payload {
            Payload::Version(v) => self.on_version(v).await,
            Payload::Verack => {
                self.verack_received = true;
                self.try_establish().await
            }
            Payload::Addr { addresses } => {
                self.on_addr(addresses);
                Ok(())
            }
            Payload::Inv { vectors } => {
                self.on_inv(vectors);
                Ok(())
            }
            Payload::GetData { vectors } => self.on_getdata(vectors).await,
            Payload::Object(obj) => {
                self.on_object(obj);
                Ok(())
            }
            Payload::Ping => self.send(&Payload::Pong).await,
            Payload::Pong => Ok(()),
            Payload::Error(e) => {
                let text = String::from_utf8_lossy(&e.text).into_owned();
                if e.fatal == 2 {
                    return Err(NetworkError::RemoteFatal { text });
                }
                info!("connection {} reported an error: {}", self.remote, text);
                Ok(())
            }
        }
    }

    async fn on_version(&mut self, v: VersionPayload) -> NetworkResult<()> {
        if self.version_received {
            return Err(NetworkError::policy("duplicate version message"));
        }
        if v.nonce == self.state.nonce {
            return Err(NetworkError::policy("connection to self"));
        }
        let now = unix_now() as i64;
        let offset = (v.timestamp as i64 - now).unsigned_abs();
        if offset > self.state.config.max_time_offset {
            return Err(NetworkError::policy(format!(
                "time offset too large: {} s",
                offset
            )));
        }
        if v.protocol_version < self.state.config.protocol_version {
            return Err(NetworkError::policy(format!(
                "obsolete protocol version {}",
                v.protocol_version
            )));
        }
        if !v.streams.contains(&self.state.config.stream) {
            return Err(NetworkError::policy(format!(
                "stream {} not offered",
                self.state.config.stream
            )));
        }

        info!(
            "connection {} runs {} (services {:#x})",
            self.remote,
            String::from_utf8_lossy(&v.user_agent),
            v.services
        );
        *self.peer.lock() = Some(PeerInfo {
            services: v.services,
            user_agent: v.user_agent,
            streams: v.streams,
        });
        self.version_received = true;

        if self.direction == ConnectionDirection::Inbound {
            self.send_version().await?;
        }
        self.send(&Payload::Verack).await?;
        self.try_establish().await
    }

    /// Moves to `fully_established` once both sides have verack-ed.
    async fn try_establish(&mut self) -> NetworkResult<()> {
        if self.fully_established || !self.version_received || !self.verack_received {
            return Ok(());
        }

        // Diversity: one connection per network group. Outbound dials were
        // screened by the manager; inbound peers are checked here against
        // every other live worker.
        if self.direction == ConnectionDirection::Inbound {
            let group = self.remote.network_group();
            if self.state.group_already_connected(&group, self.id) {
                info!(
                    "connection {} duplicates an existing network group, closing",
                    self.remote
                );
                self.disconnect_requested = true;
                return Ok(());
            }
        }

        self.fully_established = true;
        self.set_status(ConnectionState::FullyEstablished);
        info!("connection {} is fully established", self.remote);

        if self.bootstrap {
            // A bootstrapper only wants the addr that follows
            return Ok(());
        }

        if !self.remote.is_i2p() || self.direction == ConnectionDirection::Outbound {
            self.state.pools.write().add_checked(self.remote.clone());
        }

        self.send_addr().await?;
        self.send_initial_inv().await
    }

    /// Shares a diversified sample of known peers.
    async fn send_addr(&mut self) -> NetworkResult<()> {
        let sampled = {
            let pools = self.state.pools.read();
            PeerPools::sample(&pools.node_pool, ADDR_SAMPLE)
        };
        let stream = self.state.config.stream as u32;
        let addresses: HashSet<NetAddr> = sampled
            .into_iter()
            .filter_map(|addr| match addr {
                PeerAddr::Ip { host, port } => {
                    parse_host(&host).map(|ip| NetAddr::new(1, ip, port, stream))
                }
                PeerAddr::I2p { .. } => None,
            })
            .collect();
        if addresses.is_empty() {
            return Ok(());
        }
        self.send(&Payload::Addr { addresses }).await
    }

    /// Advertises everything we hold.
    async fn send_initial_inv(&mut self) -> NetworkResult<()> {
        let vectors = self.state.objects.read().live_vectors(unix_now());
        for batch in vectors.chunks(INV_BATCH) {
            let payload = Payload::Inv {
                vectors: batch.iter().copied().collect(),
            };
            self.send(&payload).await?;
        }
        Ok(())
    }

    fn on_addr(&mut self, addresses: HashSet<NetAddr>) {
        {
            let mut pools = self.state.pools.write();
            for addr in &addresses {
                pools.add_unchecked(addr.peer_addr());
            }
        }
        debug!(
            "connection {} shared {} addresses",
            self.remote,
            addresses.len()
        );
        if self.bootstrap {
            // Harvest complete
            self.disconnect_requested = true;
        }
    }

    fn on_inv(&mut self, vectors: HashSet<Vector>) {
        if !self.fully_established {
            return;
        }
        let state = self.state.clone();
        let objects = state.objects.read();
        for vector in vectors {
            if objects.contains(&vector)
                || self.vectors_requested.contains_key(&vector)
                || self.vectors_to_get.contains(&vector)
            {
                continue;
            }
            self.vectors_to_get.insert(vector);
        }
    }

    async fn on_getdata(&mut self, vectors: HashSet<Vector>) -> NetworkResult<()> {
        if vectors.len() > MAX_GETDATA_VECTORS {
            return Err(NetworkError::policy(format!(
                "requested {} objects at once",
                vectors.len()
            )));
        }
        for vector in vectors {
            // Unknown vectors are skipped silently
            let obj = self.state.objects.read().get(&vector).cloned();
            if let Some(obj) = obj {
                self.send(&Payload::Object(obj)).await?;
            }
        }
        Ok(())
    }

    fn on_object(&mut self, obj: crate::messages::Object) {
        let vector = *obj.vector();
        self.vectors_requested.remove(&vector);
        self.vectors_to_get.remove(&vector);
        if self.state.objects.read().contains(&vector) {
            return;
        }
        if !self.state.insert_object(obj, Some(self.id)) {
            debug!(
                "connection {} sent unacceptable object {}",
                self.remote,
                hex::encode(vector)
            );
        }
    }

    /// Work done between reads: request queues, gossip, keepalive.
    async fn periodic(&mut self) -> NetworkResult<()> {
        if !self.fully_established {
            if self.started.elapsed() > HANDSHAKE_TIMEOUT {
                debug!("connection {} handshake timed out", self.remote);
                return Err(NetworkError::Transport(std::io::Error::from(
                    std::io::ErrorKind::TimedOut,
                )));
            }
            return Ok(());
        }

        // Vectors other workers asked us to gossip
        while let Ok(vector) = self.announce_rx.try_recv() {
            self.vectors_to_send.insert(vector);
        }
        if !self.vectors_to_send.is_empty() {
            let batch: HashSet<Vector> = self
                .vectors_to_send
                .iter()
                .take(INV_BATCH)
                .copied()
                .collect();
            for vector in &batch {
                self.vectors_to_send.remove(vector);
            }
            self.send(&Payload::Inv { vectors: batch }).await?;
        }

        // Unanswered requests go back into the queue
        let stale: Vec<Vector> = self
            .vectors_requested
            .iter()
            .filter(|(_, at)| at.elapsed() > REQUEST_RETRY)
            .map(|(v, _)| *v)
            .collect();
        for vector in stale {
            self.vectors_requested.remove(&vector);
            self.vectors_to_get.insert(vector);
        }

        // Request a bounded batch of missing objects
        if !self.vectors_to_get.is_empty() {
            let batch: HashSet<Vector> = self
                .vectors_to_get
                .iter()
                .take(GETDATA_BATCH)
                .copied()
                .collect();
            let now = Instant::now();
            for vector in &batch {
                self.vectors_to_get.remove(vector);
                self.vectors_requested.insert(*vector, now);
            }
            self.send(&Payload::GetData { vectors: batch }).await?;
        }

        // Keepalive
        let quiet = self.last_received.elapsed();
        if quiet > IDLE_TIMEOUT {
            debug!("connection {} idle, closing", self.remote);
            self.disconnect_requested = true;
        } else if quiet > PING_INTERVAL && self.last_ping.elapsed() > PING_INTERVAL {
            self.last_ping = Instant::now();
            self.send(&Payload::Ping).await?;
        }
        Ok(())
    }

    async fn send_version(&mut self) -> NetworkResult<()> {
        let (host, port) = match &self.remote {
            PeerAddr::Ip { host, port } => (
                parse_host(host).unwrap_or_else(crate::messages::address::localhost),
                *port,
            ),
            // Destinations do not fit an IP field; a placeholder goes out
            PeerAddr::I2p { .. } => (
                crate::messages::address::localhost(),
                self.state.config.listen_port,
            ),
        };
        let version = VersionPayload::new(&self.state.config, self.state.nonce, host, port);
        self.send(&Payload::Version(version)).await
    }

    async fn send(&mut self, payload: &Payload) -> NetworkResult<()> {
        let bytes = Message::new(self.state.config.magic, payload).to_bytes();
        debug!(
            "sending {} to {} ({} bytes)",
            payload.command(),
            self.remote,
            bytes.len()
        );
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| NetworkError::resource("send before connect"))?;
        stream
            .write_all(&bytes)
            .await
            .map_err(NetworkError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::FullyEstablished.to_string(), "fully_established");
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::FullyEstablished.is_terminal());
        assert!(!ConnectionState::Disconnecting.is_terminal());
    }
}

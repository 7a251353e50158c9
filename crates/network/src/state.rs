//! Process-wide shared state.
//!
//! A single [`State`] value is created at startup and handed to every
//! worker as an `Arc`; workers hold no references to each other. The
//! manager inspects live workers through the small capability surface of
//! [`ConnectionHandle`] and [`DialerHandle`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{unix_now, NetworkConfig};
use crate::connection::{ConnectionDirection, ConnectionState, PeerInfo};
use crate::messages::Vector;
use crate::peers::PeerAddr;
use crate::pools::PeerPools;
use crate::store::ObjectStore;

/// Handle to a live connection worker.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: u64,
    pub remote: PeerAddr,
    pub direction: ConnectionDirection,
    status: Arc<Mutex<ConnectionState>>,
    stop: Arc<AtomicBool>,
    peer: Arc<Mutex<Option<PeerInfo>>>,
    announce_tx: mpsc::UnboundedSender<Vector>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        remote: PeerAddr,
        direction: ConnectionDirection,
        status: Arc<Mutex<ConnectionState>>,
        stop: Arc<AtomicBool>,
        peer: Arc<Mutex<Option<PeerInfo>>>,
        announce_tx: mpsc::UnboundedSender<Vector>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            remote,
            direction,
            status,
            stop,
            peer,
            announce_tx,
            task,
        }
    }

    pub fn status(&self) -> ConnectionState {
        *self.status.lock()
    }

    /// What the peer announced about itself, once the handshake got far
    /// enough to know.
    pub fn peer_info(&self) -> Option<PeerInfo> {
        self.peer.lock().clone()
    }

    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction == ConnectionDirection::Outbound
    }

    pub fn network_group(&self) -> Vec<u8> {
        self.remote.network_group()
    }

    /// Asks the worker to wind down on its next loop iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Queues a vector for gossip on this connection.
    pub fn announce(&self, vector: Vector) {
        let _ = self.announce_tx.send(vector);
    }
}

/// Handle to an in-flight I2P dial attempt.
#[derive(Debug)]
pub struct DialerHandle {
    pub destination: PeerAddr,
    task: JoinHandle<()>,
}

impl DialerHandle {
    pub(crate) fn new(destination: PeerAddr, task: JoinHandle<()>) -> Self {
        Self { destination, task }
    }

    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Established I2P session, published by the controller.
#[derive(Debug, Clone)]
pub struct I2pSessionInfo {
    pub nick: String,
    pub dest_pub: String,
    pub b32: String,
    pub transient: bool,
}

/// All shared node state; every lock lives here.
pub struct State {
    pub config: NetworkConfig,
    /// Random per-process nonce announced in `version`, used to detect
    /// connections to ourselves
    pub nonce: [u8; 8],
    pub objects: RwLock<ObjectStore>,
    pub pools: RwLock<PeerPools>,
    pub connections: Mutex<Vec<ConnectionHandle>>,
    pub i2p_dialers: Mutex<Vec<DialerHandle>>,
    /// Network groups represented among live connections and dialers;
    /// owned by the manager and replaced wholesale each tick
    pub hosts: RwLock<HashSet<Vec<u8>>>,
    pub i2p_session: RwLock<Option<I2pSessionInfo>>,
    shutdown: AtomicBool,
}

impl State {
    pub fn new(config: NetworkConfig) -> Arc<Self> {
        let mut nonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce);
        Arc::new(Self {
            config,
            nonce,
            objects: RwLock::new(ObjectStore::new()),
            pools: RwLock::new(PeerPools::new()),
            connections: Mutex::new(Vec::new()),
            i2p_dialers: Mutex::new(Vec::new()),
            hosts: RwLock::new(HashSet::new()),
            i2p_session: RwLock::new(None),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Flips the process-wide shutdown flag; every worker exits its loop
    /// on the next iteration.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn objects_path(&self) -> PathBuf {
        self.config.data_dir.join("objects.dat")
    }

    pub fn nodes_path(&self) -> PathBuf {
        self.config.data_dir.join("nodes.dat")
    }

    pub fn i2p_nodes_path(&self) -> PathBuf {
        self.config.data_dir.join("i2p_nodes.dat")
    }

    pub fn i2p_key_path(&self) -> PathBuf {
        self.config.data_dir.join("i2p_dest_priv.key")
    }

    /// Registers a connection worker.
    pub fn register_connection(&self, handle: ConnectionHandle) {
        self.connections.lock().push(handle);
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().iter().filter(|c| c.is_alive()).count()
    }

    /// Inserts a validated object into the store and, when new, gossips
    /// its vector to every fully established connection except `source`.
    pub fn insert_object(&self, obj: crate::messages::Object, source: Option<u64>) -> bool {
        let vector = *obj.vector();
        let inserted = self
            .objects
            .write()
            .insert(&self.config, unix_now(), obj);
        if inserted {
            self.broadcast_vector(vector, source);
        }
        inserted
    }

    /// Queues `vector` for gossip on every fully established connection,
    /// excluding the connection with id `exclude`.
    pub fn broadcast_vector(&self, vector: Vector, exclude: Option<u64>) {
        let connections = self.connections.lock();
        for c in connections.iter() {
            if Some(c.id) == exclude {
                continue;
            }
            if c.status() == ConnectionState::FullyEstablished {
                c.announce(vector);
            }
        }
    }

    /// True when another fully established connection or a pending I2P
    /// dial already covers the given network group. Used for duplicate
    /// rejection at acceptance.
    pub fn group_already_connected(&self, group: &[u8], self_id: u64) -> bool {
        {
            let connections = self.connections.lock();
            if connections.iter().any(|c| {
                c.id != self_id
                    && c.is_alive()
                    && c.status() == ConnectionState::FullyEstablished
                    && c.network_group() == group
            }) {
                return true;
            }
        }
        self.i2p_dialers
            .lock()
            .iter()
            .any(|d| d.is_alive() && d.destination.network_group() == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_flag() {
        let state = State::new(NetworkConfig::default());
        assert!(!state.shutting_down());
        state.shutdown();
        assert!(state.shutting_down());
    }

    #[test]
    fn test_paths() {
        let mut config = NetworkConfig::default();
        config.data_dir = PathBuf::from("/tmp/bmnode-test");
        let state = State::new(config);
        assert_eq!(state.objects_path(), PathBuf::from("/tmp/bmnode-test/objects.dat"));
        assert_eq!(state.nodes_path(), PathBuf::from("/tmp/bmnode-test/nodes.dat"));
    }

    #[test]
    fn test_nonce_randomized() {
        let a = State::new(NetworkConfig::default());
        let b = State::new(NetworkConfig::default());
        // Distinct processes must essentially never share a nonce
        assert_ne!(a.nonce, b.nonce);
    }
}

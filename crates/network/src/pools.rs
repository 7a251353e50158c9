//! Known-peer pools.
//!
//! Checked pools hold peers observed to complete a handshake; unchecked
//! pools hold peers merely announced by others. Checked pools are
//! persisted on the manager's cadence, capped by random subsampling;
//! unchecked pools and the ban table live only in memory.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rand::seq::IteratorRandom;
use tracing::{debug, warn};

use crate::peers::PeerAddr;

/// Persist-time capacity caps
const NODE_POOL_CAP: usize = 10_000;
const UNCHECKED_POOL_CAP: usize = 1_000;
const I2P_NODE_POOL_CAP: usize = 1_000;
const I2P_UNCHECKED_POOL_CAP: usize = 100;

/// All known-peer state.
#[derive(Debug, Default)]
pub struct PeerPools {
    /// IP peers that completed a handshake at some point
    pub node_pool: HashSet<PeerAddr>,
    /// IP peers announced via `addr`, not yet contacted
    pub unchecked_node_pool: HashSet<PeerAddr>,
    /// I2P peers that completed a handshake
    pub i2p_node_pool: HashSet<PeerAddr>,
    /// I2P peers announced via `addr`
    pub i2p_unchecked_node_pool: HashSet<PeerAddr>,
    /// Compiled-in IP seeds
    pub core_nodes: HashSet<PeerAddr>,
    /// Compiled-in I2P seeds
    pub i2p_core_nodes: HashSet<PeerAddr>,
    /// Peers excluded from reconnection until the given epoch second
    bans: HashMap<PeerAddr, u64>,
}

impl PeerPools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws up to `k` random peers from `pool` without replacement.
    pub fn sample(pool: &HashSet<PeerAddr>, k: usize) -> Vec<PeerAddr> {
        pool.iter().cloned().choose_multiple(&mut rand::thread_rng(), k)
    }

    /// Excludes `addr` from reconnection until `until` (epoch seconds).
    pub fn ban(&mut self, addr: PeerAddr, until: u64) {
        debug!("banned {} until {}", addr, until);
        self.bans.insert(addr, until);
    }

    /// Whether `addr` is currently excluded. Expired entries are dropped
    /// on the way through.
    pub fn is_banned(&mut self, addr: &PeerAddr, now: u64) -> bool {
        match self.bans.get(addr) {
            Some(&until) if until > now => true,
            Some(_) => {
                self.bans.remove(addr);
                false
            }
            None => false,
        }
    }

    /// Merges a gossiped address into the right unchecked pool, subject to
    /// caps and sanity.
    pub fn add_unchecked(&mut self, addr: PeerAddr) {
        if !addr.is_gossipable() {
            return;
        }
        if addr.is_i2p() {
            if self.i2p_unchecked_node_pool.len() < I2P_UNCHECKED_POOL_CAP
                && !self.i2p_node_pool.contains(&addr)
            {
                self.i2p_unchecked_node_pool.insert(addr);
            }
        } else if self.unchecked_node_pool.len() < UNCHECKED_POOL_CAP
            && !self.node_pool.contains(&addr)
        {
            self.unchecked_node_pool.insert(addr);
        }
    }

    /// Records a handshake-confirmed peer.
    pub fn add_checked(&mut self, addr: PeerAddr) {
        if addr.is_i2p() {
            self.i2p_unchecked_node_pool.remove(&addr);
            self.i2p_node_pool.insert(addr);
        } else {
            self.unchecked_node_pool.remove(&addr);
            self.node_pool.insert(addr);
        }
    }

    /// Enforces the capacity caps by random subsampling.
    pub fn enforce_caps(&mut self) {
        for (pool, cap) in [
            (&mut self.node_pool, NODE_POOL_CAP),
            (&mut self.unchecked_node_pool, UNCHECKED_POOL_CAP),
            (&mut self.i2p_node_pool, I2P_NODE_POOL_CAP),
            (&mut self.i2p_unchecked_node_pool, I2P_UNCHECKED_POOL_CAP),
        ] {
            if pool.len() > cap {
                *pool = Self::sample(pool, cap).into_iter().collect();
            }
        }
    }

    /// Persists the checked pools.
    pub fn save(&mut self, nodes_path: &Path, i2p_nodes_path: &Path) {
        self.enforce_caps();
        save_pool(&self.node_pool, nodes_path);
        save_pool(&self.i2p_node_pool, i2p_nodes_path);
        debug!(
            "saved {} nodes and {} i2p nodes",
            self.node_pool.len(),
            self.i2p_node_pool.len()
        );
    }

    /// Reloads the checked pools; missing or corrupt snapshots leave the
    /// pools as they are.
    pub fn load(&mut self, nodes_path: &Path, i2p_nodes_path: &Path) {
        self.node_pool.extend(load_pool(nodes_path));
        self.i2p_node_pool.extend(load_pool(i2p_nodes_path));
    }

    /// Loads a two-column seed CSV (host,port or destination,i2p) into the
    /// core and checked pools.
    pub fn load_core_nodes(&mut self, csv: &str, i2p_csv: &str) {
        for line in csv.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once(',') {
                Some((host, port)) => match port.trim().parse::<u16>() {
                    Ok(port) => {
                        self.core_nodes.insert(PeerAddr::ip(host.trim(), port));
                    }
                    Err(_) => warn!("bad seed line: {}", line),
                },
                None => warn!("bad seed line: {}", line),
            }
        }
        for line in i2p_csv.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let destination = line.split(',').next().unwrap_or(line).trim();
            self.i2p_core_nodes.insert(PeerAddr::i2p(destination));
        }
        self.node_pool.extend(self.core_nodes.iter().cloned());
        self.i2p_node_pool.extend(self.i2p_core_nodes.iter().cloned());
    }
}

fn save_pool(pool: &HashSet<PeerAddr>, path: &Path) {
    let entries: Vec<&PeerAddr> = pool.iter().collect();
    match bincode::serialize(&entries) {
        Ok(bytes) => {
            if let Err(e) = std::fs::write(path, bytes) {
                warn!("error while saving nodes: {}", e);
            }
        }
        Err(e) => warn!("error while serializing nodes: {}", e),
    }
}

fn load_pool(path: &Path) -> HashSet<PeerAddr> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashSet::new(),
        Err(e) => {
            warn!("error while loading nodes from disk: {}", e);
            return HashSet::new();
        }
    };
    match bincode::deserialize::<Vec<PeerAddr>>(&bytes) {
        Ok(entries) => entries.into_iter().collect(),
        Err(e) => {
            warn!("error while loading nodes from disk: {}", e);
            HashSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample() {
        let pool: HashSet<PeerAddr> = (0..20)
            .map(|i| PeerAddr::ip(format!("10.0.0.{}", i), 8444))
            .collect();
        let s = PeerPools::sample(&pool, 5);
        assert_eq!(s.len(), 5);
        assert!(s.iter().all(|a| pool.contains(a)));
        // Asking for more than the pool holds returns the whole pool
        assert_eq!(PeerPools::sample(&pool, 100).len(), 20);
    }

    #[test]
    fn test_add_unchecked_sanity() {
        let mut pools = PeerPools::new();
        pools.add_unchecked(PeerAddr::ip("127.0.0.1", 8444));
        pools.add_unchecked(PeerAddr::ip("93.184.216.34", 0));
        assert!(pools.unchecked_node_pool.is_empty());
        pools.add_unchecked(PeerAddr::ip("93.184.216.34", 8444));
        assert_eq!(pools.unchecked_node_pool.len(), 1);
    }

    #[test]
    fn test_add_checked_moves_pools() {
        let mut pools = PeerPools::new();
        let addr = PeerAddr::ip("93.184.216.34", 8444);
        pools.add_unchecked(addr.clone());
        pools.add_checked(addr.clone());
        assert!(pools.node_pool.contains(&addr));
        assert!(!pools.unchecked_node_pool.contains(&addr));
        // Already-checked peers are not re-added as unchecked
        pools.add_unchecked(addr.clone());
        assert!(pools.unchecked_node_pool.is_empty());
    }

    #[test]
    fn test_caps() {
        let mut pools = PeerPools::new();
        for i in 0..1500u32 {
            pools
                .unchecked_node_pool
                .insert(PeerAddr::ip(format!("10.{}.{}.1", i / 256, i % 256), 8444));
        }
        pools.enforce_caps();
        assert_eq!(pools.unchecked_node_pool.len(), UNCHECKED_POOL_CAP);
    }

    #[test]
    fn test_ban_expiry() {
        let mut pools = PeerPools::new();
        let addr = PeerAddr::ip("93.184.216.34", 8444);
        pools.ban(addr.clone(), 1000);
        assert!(pools.is_banned(&addr, 999));
        assert!(!pools.is_banned(&addr, 1001));
        // Expired entries are cleaned up
        assert!(!pools.is_banned(&addr, 999));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = dir.path().join("nodes.dat");
        let i2p_nodes = dir.path().join("i2p_nodes.dat");

        let mut pools = PeerPools::new();
        pools.add_checked(PeerAddr::ip("93.184.216.34", 8444));
        pools.add_checked(PeerAddr::i2p("somedestination"));
        pools.save(&nodes, &i2p_nodes);

        let mut reloaded = PeerPools::new();
        reloaded.load(&nodes, &i2p_nodes);
        assert_eq!(reloaded.node_pool, pools.node_pool);
        assert_eq!(reloaded.i2p_node_pool, pools.i2p_node_pool);
    }

    #[test]
    fn test_load_core_nodes() {
        let mut pools = PeerPools::new();
        pools.load_core_nodes(
            "5.45.99.75,8444\n95.165.168.168,8444\n\nnot a line\n",
            "abcdefg,i2p\n",
        );
        assert_eq!(pools.core_nodes.len(), 2);
        assert_eq!(pools.i2p_core_nodes.len(), 1);
        assert!(pools.node_pool.contains(&PeerAddr::ip("5.45.99.75", 8444)));
        assert!(pools.i2p_node_pool.contains(&PeerAddr::i2p("abcdefg")));
    }
}

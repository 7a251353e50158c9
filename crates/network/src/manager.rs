//! Periodic housekeeping: connection pool upkeep, pruning, persistence
//! and publication of our own I2P destination.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::unix_now;
use crate::connection::Connection;
use crate::i2p::dialer;
use crate::i2p::util::decode_destination;
use crate::messages::Object;
use crate::peers::PeerAddr;
use crate::pools::PeerPools;
use crate::pow;
use crate::state::State;

/// Manager tick
const TICK: Duration = Duration::from_millis(800);

/// Task cadences
const CLEAN_OBJECTS_EVERY: Duration = Duration::from_secs(90);
const MANAGE_CONNECTIONS_EVERY: Duration = Duration::from_secs(2);
const SAVE_OBJECTS_EVERY: Duration = Duration::from_secs(100);
const SAVE_NODES_EVERY: Duration = Duration::from_secs(60);
const PUBLISH_I2P_EVERY: Duration = Duration::from_secs(3600);

/// Candidates drawn per tick from the unchecked and checked pools
const UNCHECKED_DRAW: usize = 16;
const CHECKED_DRAW: usize = 8;

/// The manager worker.
pub struct Manager {
    state: Arc<State>,
    bootstrap_pool: Vec<PeerAddr>,
    last_cleaned_objects: Instant,
    last_managed_connections: Instant,
    last_saved_objects: Instant,
    last_saved_nodes: Instant,
    next_i2p_publish: Instant,
}

impl Manager {
    pub fn new(state: Arc<State>) -> Self {
        let now = Instant::now();
        // First publish lands 5 to 15 minutes after startup
        let publish_delay = Duration::from_secs(rand::thread_rng().gen_range(300..900));
        Self {
            state,
            bootstrap_pool: Vec::new(),
            last_cleaned_objects: now,
            last_managed_connections: now,
            last_saved_objects: now,
            last_saved_nodes: now,
            next_i2p_publish: now + publish_delay,
        }
    }

    /// Runs until the shutdown flag flips, then persists once more.
    pub async fn run(mut self) {
        self.load_data();
        self.clean_objects();
        self.fill_bootstrap_pool();

        loop {
            tokio::time::sleep(TICK).await;
            if self.state.shutting_down() {
                debug!("shutting down manager");
                break;
            }
            let now = Instant::now();
            if now - self.last_cleaned_objects > CLEAN_OBJECTS_EVERY {
                self.clean_objects();
                self.last_cleaned_objects = now;
            }
            if now - self.last_managed_connections > MANAGE_CONNECTIONS_EVERY {
                self.manage_connections();
                self.last_managed_connections = now;
            }
            if now - self.last_saved_objects > SAVE_OBJECTS_EVERY {
                self.save_objects();
                self.last_saved_objects = now;
            }
            if now - self.last_saved_nodes > SAVE_NODES_EVERY {
                self.save_nodes();
                self.last_saved_nodes = now;
            }
            if now >= self.next_i2p_publish {
                self.publish_i2p_destination();
                self.next_i2p_publish = now + PUBLISH_I2P_EVERY;
            }
        }

        self.save_objects();
        self.save_nodes();
    }

    fn load_data(&self) {
        self.state.objects.write().load(&self.state.objects_path());
        self.state
            .pools
            .write()
            .load(&self.state.nodes_path(), &self.state.i2p_nodes_path());
    }

    fn save_objects(&self) {
        self.state.objects.read().save(&self.state.objects_path());
    }

    fn save_nodes(&self) {
        self.state
            .pools
            .write()
            .save(&self.state.nodes_path(), &self.state.i2p_nodes_path());
    }

    fn clean_objects(&self) {
        self.state.objects.write().prune(unix_now());
    }

    fn fill_bootstrap_pool(&mut self) {
        let state = self.state.clone();
        let pools = state.pools.read();
        self.bootstrap_pool = pools
            .core_nodes
            .union(&pools.node_pool)
            .cloned()
            .collect();
        drop(pools);
        self.bootstrap_pool.shuffle(&mut rand::thread_rng());
    }

    /// Starts a short-lived connection that only harvests an `addr`.
    fn bootstrap(&mut self, hosts: &mut HashSet<Vec<u8>>) {
        let Some(target) = self.bootstrap_pool.pop() else {
            warn!("ran out of bootstrap nodes, refilling");
            self.fill_bootstrap_pool();
            return;
        };
        info!("starting a bootstrapper for {}", target);
        hosts.insert(target.network_group());
        let handle = Connection::spawn_outbound(self.state.clone(), target, true);
        self.state.register_connection(handle);
    }

    /// Sweeps dead workers, rebuilds the hosts set and tops up outgoing
    /// connections under the diversity constraint.
    fn manage_connections(&mut self) {
        let mut hosts: HashSet<Vec<u8>> = HashSet::new();
        let mut outgoing = 0usize;

        {
            let mut connections = self.state.connections.lock();
            connections.retain(|c| c.is_alive() && !c.status().is_terminal());
            for c in connections.iter() {
                hosts.insert(c.network_group());
                if c.is_outgoing() {
                    outgoing += 1;
                }
            }
        }
        {
            let mut dialers = self.state.i2p_dialers.lock();
            dialers.retain(|d| d.is_alive());
            for d in dialers.iter() {
                hosts.insert(d.destination.network_group());
            }
        }

        let outgoing_cap = self.state.config.outgoing_connections;
        let send_outgoing = self.state.config.send_outgoing;
        let ip_enabled = self.state.config.ip_enabled;
        let i2p_enabled = self.state.config.i2p.enabled;
        let trusted_peer = self.state.config.trusted_peer.clone();

        let mut to_connect: HashSet<PeerAddr> = HashSet::new();
        let mut want_bootstrap = false;

        if let Some(trusted) = trusted_peer {
            to_connect.insert(trusted);
        } else if outgoing < outgoing_cap && send_outgoing {
            let mut pools = self.state.pools.write();
            if ip_enabled {
                let unchecked = PeerPools::sample(&pools.unchecked_node_pool, UNCHECKED_DRAW);
                if unchecked.len() < UNCHECKED_DRAW && outgoing < outgoing_cap / 2 {
                    want_bootstrap = true;
                }
                for addr in &unchecked {
                    pools.unchecked_node_pool.remove(addr);
                }
                to_connect.extend(unchecked);
                to_connect.extend(PeerPools::sample(&pools.node_pool, CHECKED_DRAW));
            }
            if i2p_enabled {
                let unchecked =
                    PeerPools::sample(&pools.i2p_unchecked_node_pool, UNCHECKED_DRAW);
                for addr in &unchecked {
                    pools.i2p_unchecked_node_pool.remove(addr);
                }
                to_connect.extend(unchecked);
                to_connect.extend(PeerPools::sample(&pools.i2p_node_pool, CHECKED_DRAW));
            }
        }
        if want_bootstrap {
            self.bootstrap(&mut hosts);
        }

        let now = unix_now();
        let own_dest = self
            .state
            .i2p_session
            .read()
            .as_ref()
            .map(|s| s.dest_pub.clone());
        for target in to_connect {
            let group = target.network_group();
            if hosts.contains(&group) {
                continue;
            }
            if self.state.pools.write().is_banned(&target, now) {
                continue;
            }
            match &target {
                PeerAddr::I2p { destination } => {
                    if !i2p_enabled {
                        continue;
                    }
                    match &own_dest {
                        Some(own) if own != destination => {
                            let handle =
                                dialer::spawn(self.state.clone(), destination.clone());
                            hosts.insert(group);
                            self.state.i2p_dialers.lock().push(handle);
                        }
                        _ => continue,
                    }
                }
                PeerAddr::Ip { .. } => {
                    let handle =
                        Connection::spawn_outbound(self.state.clone(), target.clone(), false);
                    hosts.insert(group);
                    self.state.register_connection(handle);
                }
            }
        }

        *self.state.hosts.write() = hosts;
    }

    /// Wraps our public destination in an object, solves its proof of
    /// work off the runtime and stores it (gossip follows from insertion).
    fn publish_i2p_destination(&self) {
        let session = self.state.i2p_session.read().clone();
        let Some(session) = session else { return };
        if session.transient {
            return;
        }
        info!("publishing our i2p destination");
        let payload = match decode_destination(&session.dest_pub) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("cannot decode our own destination: {}", e);
                return;
            }
        };
        let config = &self.state.config;
        let obj = Object::new(
            [0u8; 8],
            unix_now() + 2 * 3600,
            config.i2p_dest_obj_type,
            config.i2p_dest_obj_version,
            config.stream,
            payload,
        );
        let target = obj.pow_target(config, unix_now());
        let state = self.state.clone();
        tokio::spawn(async move {
            let initial_hash = obj.pow_initial_hash();
            let solved = tokio::task::spawn_blocking(move || {
                let nonce = pow::solve(target, &initial_hash);
                obj.with_nonce(nonce)
            })
            .await;
            match solved {
                Ok(obj) => {
                    state.insert_object(obj, None);
                }
                Err(e) => warn!("proof of work task failed: {}", e),
            }
        });
    }
}

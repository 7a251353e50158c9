//! Process-wide object store.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::NetworkConfig;
use crate::messages::{Object, Vector};

/// Keyed map of every object the node currently holds. A vector appears at
/// most once; entries are immutable for their lifetime and pruned 3 hours
/// past their end of life.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: HashMap<Vector, Object>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a validated object. Returns false when the vector is
    /// already present or the object fails validity.
    pub fn insert(&mut self, config: &NetworkConfig, now: u64, obj: Object) -> bool {
        if self.objects.contains_key(obj.vector()) {
            return false;
        }
        if !obj.is_valid(config, now) {
            return false;
        }
        debug!("stored object {}", hex::encode(obj.vector()));
        self.objects.insert(*obj.vector(), obj);
        true
    }

    pub fn get(&self, vector: &Vector) -> Option<&Object> {
        self.objects.get(vector)
    }

    pub fn contains(&self, vector: &Vector) -> bool {
        self.objects.contains_key(vector)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All currently held vectors.
    pub fn vectors(&self) -> Vec<Vector> {
        self.objects.keys().copied().collect()
    }

    /// Vectors of objects that have not yet reached their end of life,
    /// i.e. what we advertise to a fresh peer.
    pub fn live_vectors(&self, now: u64) -> Vec<Vector> {
        self.objects
            .iter()
            .filter(|(_, obj)| !obj.is_expired(now))
            .map(|(vector, _)| *vector)
            .collect()
    }

    /// Drops expired entries.
    pub fn prune(&mut self, now: u64) {
        self.objects.retain(|vector, obj| {
            let keep = !obj.is_expired(now);
            if !keep {
                debug!("deleted expired object {}", hex::encode(vector));
            }
            keep
        });
    }

    /// Writes a snapshot of the store to `path`.
    pub fn save(&self, path: &Path) {
        let entries: Vec<&Object> = self.objects.values().collect();
        match bincode::serialize(&entries) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!("error while saving objects: {}", e);
                } else {
                    debug!("saved {} objects", entries.len());
                }
            }
            Err(e) => warn!("error while serializing objects: {}", e),
        }
    }

    /// Reloads a snapshot. A missing file is a first start; a malformed
    /// one is logged and ignored.
    pub fn load(&mut self, path: &Path) {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("error while loading objects from disk: {}", e);
                return;
            }
        };
        match bincode::deserialize::<Vec<Object>>(&bytes) {
            Ok(entries) => {
                for obj in entries {
                    self.objects.insert(*obj.vector(), obj);
                }
                debug!("loaded {} objects", self.objects.len());
            }
            Err(e) => warn!("error while loading objects from disk: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::unix_now;
    use crate::pow;

    fn solved_object(config: &NetworkConfig, payload: &[u8]) -> Object {
        let obj = Object::new(
            [0u8; 8],
            unix_now() + 3600,
            42,
            1,
            config.stream,
            payload.to_vec(),
        );
        let target = obj.pow_target(config, unix_now());
        obj.with_nonce(pow::solve(target, &obj.pow_initial_hash()))
    }

    #[test]
    fn test_insert_dedup() {
        let config = NetworkConfig::default();
        let mut store = ObjectStore::new();
        let obj = solved_object(&config, b"one");
        assert!(store.insert(&config, unix_now(), obj.clone()));
        assert!(!store.insert(&config, unix_now(), obj.clone()));
        assert!(store.contains(obj.vector()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_insert_rejects_invalid() {
        let config = NetworkConfig::default();
        let mut store = ObjectStore::new();
        // No proof of work
        let obj = Object::new([0u8; 8], unix_now() + 3600, 42, 1, config.stream, vec![]);
        assert!(!store.insert(&config, unix_now(), obj));
        assert!(store.is_empty());
    }

    #[test]
    fn test_prune() {
        let config = NetworkConfig::default();
        let mut store = ObjectStore::new();
        let obj = solved_object(&config, b"fresh");
        let now = unix_now();
        assert!(store.insert(&config, now, obj.clone()));
        store.prune(now);
        assert_eq!(store.len(), 1);
        // Well past end of life plus slack
        store.prune(obj.expires_time() + 4 * 3600);
        assert!(store.is_empty());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let config = NetworkConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.dat");

        let mut store = ObjectStore::new();
        let a = solved_object(&config, b"a");
        let b = solved_object(&config, b"b");
        store.insert(&config, unix_now(), a.clone());
        store.insert(&config, unix_now(), b.clone());
        store.save(&path);

        let mut reloaded = ObjectStore::new();
        reloaded.load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(a.vector()), Some(&a));
        assert_eq!(reloaded.get(b.vector()), Some(&b));
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.dat");

        let mut store = ObjectStore::new();
        store.load(&path);
        assert!(store.is_empty());

        std::fs::write(&path, b"not a snapshot").unwrap();
        store.load(&path);
        assert!(store.is_empty());
    }
}

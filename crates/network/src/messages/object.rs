//! The `object` entity.
//!
//! An object is an opaque signed payload propagated by the overlay,
//! addressed by the first 32 bytes of a double SHA-512 over its serialized
//! form and protected by proof of work and an expiration time. The node
//! never interprets payloads beyond the header fields.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::{debug, warn};

use crate::config::{NetworkConfig, MAX_OBJECT_PAYLOAD, MAX_OBJECT_TTL, OBJECT_EXPIRY_SLACK};
use crate::error::{NetworkError, NetworkResult};
use crate::pow;

use super::reader::Reader;
use super::varint;

/// A gossiped object.
///
/// Immutable once constructed; the identifying vector is derived at
/// construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    nonce: [u8; 8],
    expires_time: u64,
    object_type: u32,
    version: u64,
    stream_number: u64,
    payload: Vec<u8>,
    vector: [u8; 32],
}

impl Object {
    pub fn new(
        nonce: [u8; 8],
        expires_time: u64,
        object_type: u32,
        version: u64,
        stream_number: u64,
        payload: Vec<u8>,
    ) -> Self {
        let mut obj = Self {
            nonce,
            expires_time,
            object_type,
            version,
            stream_number,
            payload,
            vector: [0u8; 32],
        };
        obj.vector = derive_vector(&obj.to_bytes());
        obj
    }

    /// Decodes an `object` message payload.
    pub fn from_payload(payload: &[u8]) -> NetworkResult<Self> {
        if payload.len() > MAX_OBJECT_PAYLOAD + 100 {
            return Err(NetworkError::malformed("object", "oversized"));
        }
        let mut r = Reader::new("object", payload);
        let nonce: [u8; 8] = r.read_array()?;
        let expires_time = r.read_u64()?;
        let object_type = r.read_u32()?;
        let version = r.read_var_int()?;
        let stream_number = r.read_var_int()?;
        let object_payload = r.read_bytes(r.remaining())?.to_vec();
        Ok(Self::new(
            nonce,
            expires_time,
            object_type,
            version,
            stream_number,
            object_payload,
        ))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(20 + 4 + self.payload.len());
        b.extend_from_slice(&self.nonce);
        b.extend_from_slice(&self.expires_time.to_be_bytes());
        b.extend_from_slice(&self.object_type.to_be_bytes());
        b.extend_from_slice(&varint::encode(self.version));
        b.extend_from_slice(&varint::encode(self.stream_number));
        b.extend_from_slice(&self.payload);
        b
    }

    pub fn nonce(&self) -> [u8; 8] {
        self.nonce
    }

    pub fn expires_time(&self) -> u64 {
        self.expires_time
    }

    pub fn object_type(&self) -> u32 {
        self.object_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stream_number(&self) -> u64 {
        self.stream_number
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The identifying vector: first 32 bytes of double SHA-512 over the
    /// serialized object.
    pub fn vector(&self) -> &[u8; 32] {
        &self.vector
    }

    /// First 32 payload bytes for the type/version combinations that carry
    /// a tag; metadata only, no index is kept.
    pub fn tag(&self) -> Option<&[u8]> {
        let tagged = (self.object_type == 3 && self.version == 5)
            || ((self.object_type == 0 || self.object_type == 1) && self.version == 4);
        if tagged {
            self.payload.get(..32)
        } else {
            None
        }
    }

    /// Returns a copy with a different nonce, re-deriving the vector.
    /// Used after the proof of work has been solved.
    pub fn with_nonce(&self, nonce: [u8; 8]) -> Self {
        Self::new(
            nonce,
            self.expires_time,
            self.object_type,
            self.version,
            self.stream_number,
            self.payload.clone(),
        )
    }

    /// Whether the object's time to live has run out (3 hours of slack
    /// past the announced end of life).
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_time + OBJECT_EXPIRY_SLACK < now
    }

    /// Full ingress validity: not expired, end of life within bounds,
    /// payload within bounds, our stream, sufficient proof of work.
    pub fn is_valid(&self, config: &NetworkConfig, now: u64) -> bool {
        if self.is_expired(now) {
            debug!("invalid object {}: expired", hex::encode(self.vector));
            return false;
        }
        if self.expires_time > now + MAX_OBJECT_TTL + OBJECT_EXPIRY_SLACK {
            warn!(
                "invalid object {}: end of life too far in the future",
                hex::encode(self.vector)
            );
            return false;
        }
        if self.payload.len() > MAX_OBJECT_PAYLOAD {
            warn!(
                "invalid object {}: payload is too long",
                hex::encode(self.vector)
            );
            return false;
        }
        if self.stream_number != config.stream {
            warn!(
                "invalid object {}: not in stream {}",
                hex::encode(self.vector),
                config.stream
            );
            return false;
        }
        let target = self.pow_target(config, now);
        let value = pow::value(&self.nonce, &self.pow_initial_hash());
        if value > target {
            warn!(
                "invalid object {}: insufficient pow",
                hex::encode(self.vector)
            );
            return false;
        }
        true
    }

    /// The proof-of-work target for this object at time `now`.
    pub fn pow_target(&self, config: &NetworkConfig, now: u64) -> u64 {
        let data_len = self.to_bytes().len() as u64 - 8;
        pow::target(
            data_len,
            self.expires_time.saturating_sub(now),
            config.nonce_trials_per_byte,
            config.payload_length_extra_bytes,
        )
    }

    /// SHA-512 over the serialization with the nonce stripped.
    pub fn pow_initial_hash(&self) -> [u8; 64] {
        let digest = Sha512::digest(&self.to_bytes()[8..]);
        let mut out = [0u8; 64];
        out.copy_from_slice(&digest);
        out
    }
}

fn derive_vector(serialized: &[u8]) -> [u8; 32] {
    let digest = Sha512::digest(Sha512::digest(serialized));
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::unix_now;

    fn solved_object(config: &NetworkConfig, expires_time: u64, stream: u64) -> Object {
        let obj = Object::new([0u8; 8], expires_time, 42, 1, stream, b"payload".to_vec());
        let target = obj.pow_target(config, unix_now());
        let nonce = pow::solve(target, &obj.pow_initial_hash());
        obj.with_nonce(nonce)
    }

    #[test]
    fn test_roundtrip() {
        let obj = Object::new([7u8; 8], 1_700_000_000, 2, 1, 1, vec![1, 2, 3]);
        let decoded = Object::from_payload(&obj.to_bytes()).unwrap();
        assert_eq!(decoded, obj);
        assert_eq!(decoded.vector(), obj.vector());
    }

    #[test]
    fn test_vector_changes_with_content() {
        let a = Object::new([0u8; 8], 1_700_000_000, 2, 1, 1, vec![1]);
        let b = Object::new([0u8; 8], 1_700_000_000, 2, 1, 1, vec![2]);
        assert_ne!(a.vector(), b.vector());
    }

    #[test]
    fn test_tag() {
        let payload = vec![0xabu8; 40];
        let tagged = Object::new([0u8; 8], 1_700_000_000, 3, 5, 1, payload.clone());
        assert_eq!(tagged.tag(), Some(&payload[..32]));
        let tagged = Object::new([0u8; 8], 1_700_000_000, 1, 4, 1, payload.clone());
        assert_eq!(tagged.tag(), Some(&payload[..32]));
        let untagged = Object::new([0u8; 8], 1_700_000_000, 2, 1, 1, payload);
        assert_eq!(untagged.tag(), None);
    }

    #[test]
    fn test_valid_object() {
        let config = NetworkConfig::default();
        let obj = solved_object(&config, unix_now() + 3600, config.stream);
        assert!(obj.is_valid(&config, unix_now()));
    }

    #[test]
    fn test_expired_object_invalid() {
        let config = NetworkConfig::default();
        let now = unix_now();
        let obj = Object::new([0u8; 8], now - 4 * 3600, 42, 1, 1, vec![]);
        assert!(obj.is_expired(now));
        assert!(!obj.is_valid(&config, now));
        // Within the 3 hour slack it is not yet expired
        let obj = Object::new([0u8; 8], now - 3600, 42, 1, 1, vec![]);
        assert!(!obj.is_expired(now));
    }

    #[test]
    fn test_far_future_object_invalid() {
        let config = NetworkConfig::default();
        let now = unix_now();
        let obj = solved_object(&config, now + MAX_OBJECT_TTL + OBJECT_EXPIRY_SLACK + 600, 1);
        assert!(!obj.is_valid(&config, now));
    }

    #[test]
    fn test_wrong_stream_invalid() {
        let config = NetworkConfig::default();
        let obj = solved_object(&config, unix_now() + 3600, config.stream + 1);
        assert!(!obj.is_valid(&config, unix_now()));
    }

    #[test]
    fn test_insufficient_pow_invalid() {
        let config = NetworkConfig::default();
        let now = unix_now();
        // An unsolved zero nonce essentially never meets the target
        let obj = Object::new([0u8; 8], now + 3600, 42, 1, config.stream, b"payload".to_vec());
        assert!(!obj.is_valid(&config, now));
    }
}

//! Proof of work.
//!
//! Validation is exact integer arithmetic; the solver is a plain counter
//! loop intended to run on a blocking thread (difficulty for our own
//! published objects is low).

use sha2::{Digest, Sha512};

/// Trial value for a nonce: first 8 bytes, big-endian, of a double
/// SHA-512 over nonce ‖ initial hash.
pub fn value(nonce: &[u8; 8], initial_hash: &[u8; 64]) -> u64 {
    let mut hasher = Sha512::new();
    hasher.update(nonce);
    hasher.update(initial_hash);
    let digest = Sha512::digest(hasher.finalize());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Target for an object whose serialization (nonce stripped) is
/// `data_len` bytes with `dt` seconds left to live:
/// `2^64 / (trials · (length + dt·length / 2^16))` with
/// `length = data_len + 8 + extra`.
pub fn target(data_len: u64, dt: u64, nonce_trials_per_byte: u64, extra_bytes: u64) -> u64 {
    let length = (data_len + 8 + extra_bytes) as u128;
    let ttl_term = (dt as u128 * length) >> 16;
    let divisor = nonce_trials_per_byte as u128 * (length + ttl_term);
    let target = (1u128 << 64) / divisor.max(1);
    target.min(u64::MAX as u128) as u64
}

/// Finds a nonce whose trial value meets `target`. Runs until found;
/// callers put it on a blocking thread.
pub fn solve(target: u64, initial_hash: &[u8; 64]) -> [u8; 8] {
    let mut counter: u64 = 0;
    loop {
        let nonce = counter.to_be_bytes();
        if value(&nonce, initial_hash) <= target {
            return nonce;
        }
        counter = counter.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_monotonic_in_ttl() {
        let short = target(100, 0, 1000, 1000);
        let long = target(100, 24 * 3600, 1000, 1000);
        assert!(long < short, "longer TTL must be harder");
    }

    #[test]
    fn test_target_monotonic_in_length() {
        let small = target(100, 3600, 1000, 1000);
        let large = target(10_000, 3600, 1000, 1000);
        assert!(large < small, "bigger payloads must be harder");
    }

    #[test]
    fn test_solve_meets_target() {
        let initial_hash = {
            let digest = Sha512::digest(b"some object data");
            let mut out = [0u8; 64];
            out.copy_from_slice(&digest);
            out
        };
        let t = target(16, 3600, 1000, 1000);
        let nonce = solve(t, &initial_hash);
        assert!(value(&nonce, &initial_hash) <= t);
    }
}

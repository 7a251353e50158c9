//! Node configuration.
//!
//! A single [`NetworkConfig`] value is assembled at startup and threaded
//! into every worker through the shared [`crate::state::State`].

use std::path::PathBuf;

use crate::peers::PeerAddr;

/// Wire magic prepended to every frame
pub const DEFAULT_MAGIC: u32 = 0xE9BE_B4D9;

/// Minimum protocol version we will talk to
pub const PROTOCOL_VERSION: u32 = 3;

/// Default TCP listening port
pub const DEFAULT_PORT: u16 = 8444;

/// Object payloads may not exceed this many bytes
pub const MAX_OBJECT_PAYLOAD: usize = 1 << 18;

/// Objects may not announce an end of life further out than 28 days
pub const MAX_OBJECT_TTL: u64 = 28 * 24 * 3600;

/// Objects are kept (and remain valid) for 3 hours past their end of life
pub const OBJECT_EXPIRY_SLACK: u64 = 3 * 3600;

/// A `version` message may not advertise more streams than this
pub const MAX_VERSION_STREAMS: usize = 160_000;

/// I2P SAM bridge configuration
#[derive(Debug, Clone)]
pub struct I2pConfig {
    /// Whether the I2P transport is enabled
    pub enabled: bool,
    /// SAM bridge host
    pub sam_host: String,
    /// SAM bridge port
    pub sam_port: u16,
    /// Use a throwaway destination instead of the persisted key
    pub transient: bool,
}

impl Default for I2pConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sam_host: "127.0.0.1".to_string(),
            sam_port: 7656,
            transient: false,
        }
    }
}

/// Runtime configuration for the node.
///
/// Defaults follow the reference overlay parameters; the CLI front-end
/// overrides individual fields before the state is constructed.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Wire magic
    pub magic: u32,
    /// Protocol version we announce
    pub protocol_version: u32,
    /// Service bitmask we announce
    pub services: u64,
    /// The single stream this node participates in
    pub stream: u64,
    /// User agent bytes announced in `version`
    pub user_agent: Vec<u8>,
    /// TCP listening port
    pub listen_port: u16,
    /// Accept incoming TCP connections
    pub listen: bool,
    /// Use the IP transport at all
    pub ip_enabled: bool,
    /// Open outgoing connections
    pub send_outgoing: bool,
    /// Target number of outgoing connections
    pub outgoing_connections: usize,
    /// Hard cap on concurrent connections
    pub connection_limit: usize,
    /// When set, the sole outbound target
    pub trusted_peer: Option<PeerAddr>,
    /// Maximum tolerated clock skew against a peer, in seconds
    pub max_time_offset: u64,
    /// Proof of work difficulty: trials per payload byte
    pub nonce_trials_per_byte: u64,
    /// Proof of work difficulty: extra bytes added to the length
    pub payload_length_extra_bytes: u64,
    /// Directory for persisted objects, peers and the I2P key
    pub data_dir: PathBuf,
    /// I2P transport settings
    pub i2p: I2pConfig,
    /// Object type used when publishing our own I2P destination
    pub i2p_dest_obj_type: u32,
    /// Object version used when publishing our own I2P destination
    pub i2p_dest_obj_version: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            magic: DEFAULT_MAGIC,
            protocol_version: PROTOCOL_VERSION,
            services: 3,
            stream: 1,
            user_agent: format!("/bmnode:{}/", env!("CARGO_PKG_VERSION")).into_bytes(),
            listen_port: DEFAULT_PORT,
            listen: true,
            ip_enabled: true,
            send_outgoing: true,
            outgoing_connections: 8,
            connection_limit: 250,
            trusted_peer: None,
            max_time_offset: 3600,
            nonce_trials_per_byte: 1000,
            payload_length_extra_bytes: 1000,
            data_dir: PathBuf::from("."),
            i2p: I2pConfig::default(),
            i2p_dest_obj_type: 0x49_3250,
            i2p_dest_obj_version: 1,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = NetworkConfig::default();
        assert_eq!(cfg.magic, 0xE9BEB4D9);
        assert_eq!(cfg.protocol_version, 3);
        assert_eq!(cfg.stream, 1);
        assert_eq!(cfg.outgoing_connections, 8);
        assert!(cfg.user_agent.starts_with(b"/bmnode:"));
        assert!(!cfg.i2p.enabled);
    }
}

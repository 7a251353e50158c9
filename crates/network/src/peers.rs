//! Peer addressing.
//!
//! A peer is either an IP endpoint or an I2P destination. Both forms are
//! interchangeable past the handshake; the rest of the crate treats them
//! through [`PeerAddr`].

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Address of a known or connected peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerAddr {
    /// An IPv4/IPv6 endpoint
    Ip { host: String, port: u16 },
    /// An I2P destination (base64 with `-~` altchars)
    I2p { destination: String },
}

impl PeerAddr {
    /// Creates an IP peer address
    pub fn ip<S: Into<String>>(host: S, port: u16) -> Self {
        Self::Ip {
            host: host.into(),
            port,
        }
    }

    /// Creates an I2P peer address
    pub fn i2p<S: Into<String>>(destination: S) -> Self {
        Self::I2p {
            destination: destination.into(),
        }
    }

    /// True for I2P destinations
    pub fn is_i2p(&self) -> bool {
        matches!(self, Self::I2p { .. })
    }

    /// The coarse network-locality key used to diversify peer selection:
    /// first 2 bytes of IPv4, first 12 of IPv6, the whole destination for
    /// I2P.
    pub fn network_group(&self) -> Vec<u8> {
        match self {
            Self::I2p { destination } => destination.as_bytes().to_vec(),
            Self::Ip { host, .. } => match host.parse::<IpAddr>() {
                Ok(IpAddr::V4(v4)) => v4.octets()[..2].to_vec(),
                Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
                    Some(v4) => v4.octets()[..2].to_vec(),
                    None => v6.octets()[..12].to_vec(),
                },
                // Unparseable hosts (e.g. a DNS name) group by themselves
                Err(_) => host.as_bytes().to_vec(),
            },
        }
    }

    /// Basic sanity for addresses learned from `addr` gossip: a routable
    /// host and a non-zero port.
    pub fn is_gossipable(&self) -> bool {
        match self {
            Self::I2p { destination } => !destination.is_empty(),
            Self::Ip { host, port } => {
                if *port == 0 {
                    return false;
                }
                match host.parse::<IpAddr>() {
                    Ok(ip) => !ip.is_loopback() && !ip.is_unspecified() && !ip.is_multicast(),
                    Err(_) => false,
                }
            }
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip { host, port } => write!(f, "{}:{}", host, port),
            Self::I2p { destination } => {
                // Destinations are long; a prefix is enough to identify one
                let head = destination.get(..12).unwrap_or(destination);
                write!(f, "{}…(i2p)", head)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_group_v4() {
        let a = PeerAddr::ip("1.2.3.4", 8444);
        let b = PeerAddr::ip("1.2.200.200", 8444);
        let c = PeerAddr::ip("2.2.3.4", 8444);
        assert_eq!(a.network_group(), vec![1, 2]);
        assert_eq!(a.network_group(), b.network_group());
        assert_ne!(a.network_group(), c.network_group());
    }

    #[test]
    fn test_network_group_v6() {
        let a = PeerAddr::ip("0102:0304:0506:0708:090A:0B0C:0D0E:0F10", 8444);
        assert_eq!(
            a.network_group(),
            vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c]
        );
    }

    #[test]
    fn test_network_group_mapped_v4() {
        let mapped = PeerAddr::ip("::ffff:1.2.3.4", 8444);
        let plain = PeerAddr::ip("1.2.3.4", 8444);
        assert_eq!(mapped.network_group(), plain.network_group());
    }

    #[test]
    fn test_network_group_i2p() {
        let dest = "shitakeyoswjvmnejyvng3gkm2rgsvcrvwgvjgqydre2wsnv6y7a";
        let a = PeerAddr::i2p(dest);
        assert_eq!(a.network_group(), dest.as_bytes().to_vec());
    }

    #[test]
    fn test_gossipable() {
        assert!(PeerAddr::ip("93.184.216.34", 8444).is_gossipable());
        assert!(!PeerAddr::ip("127.0.0.1", 8444).is_gossipable());
        assert!(!PeerAddr::ip("0.0.0.0", 8444).is_gossipable());
        assert!(!PeerAddr::ip("93.184.216.34", 0).is_gossipable());
        assert!(!PeerAddr::ip("not-an-ip", 8444).is_gossipable());
        assert!(PeerAddr::i2p("abcd").is_gossipable());
    }
}

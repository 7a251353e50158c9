//! Network address records.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::config::unix_now;
use crate::error::NetworkResult;
use crate::peers::PeerAddr;

use super::reader::Reader;

/// 26-byte address record without the time/stream prefix: u64 services,
/// 16-byte IPv6 (IPv4 mapped as `::ffff:a.b.c.d`), u16 port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetAddrNoPrefix {
    pub services: u64,
    pub host: IpAddr,
    pub port: u16,
}

/// Encoded size of [`NetAddrNoPrefix`]
pub const NET_ADDR_NO_PREFIX_LEN: usize = 26;

/// Encoded size of [`NetAddr`]
pub const NET_ADDR_LEN: usize = 38;

impl NetAddrNoPrefix {
    pub fn new(services: u64, host: IpAddr, port: u16) -> Self {
        Self {
            services,
            host,
            port,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(NET_ADDR_NO_PREFIX_LEN);
        b.extend_from_slice(&self.services.to_be_bytes());
        match self.host {
            IpAddr::V4(v4) => b.extend_from_slice(&v4.to_ipv6_mapped().octets()),
            IpAddr::V6(v6) => b.extend_from_slice(&v6.octets()),
        }
        b.extend_from_slice(&self.port.to_be_bytes());
        b
    }

    pub fn read(r: &mut Reader<'_>) -> NetworkResult<Self> {
        let services = r.read_u64()?;
        let octets: [u8; 16] = r.read_array()?;
        let v6 = Ipv6Addr::from(octets);
        // Mapped addresses come back out as plain IPv4
        let host = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        let port = r.read_u16()?;
        Ok(Self {
            services,
            host,
            port,
        })
    }
}

/// 38-byte address record as carried in `addr` payloads: u64 timestamp and
/// u32 stream prefix followed by a [`NetAddrNoPrefix`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetAddr {
    pub timestamp: u64,
    pub stream: u32,
    pub services: u64,
    pub host: IpAddr,
    pub port: u16,
}

impl NetAddr {
    /// A freshly stamped record for gossiping a known peer.
    pub fn new(services: u64, host: IpAddr, port: u16, stream: u32) -> Self {
        Self {
            timestamp: unix_now(),
            stream,
            services,
            host,
            port,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(NET_ADDR_LEN);
        b.extend_from_slice(&self.timestamp.to_be_bytes());
        b.extend_from_slice(&self.stream.to_be_bytes());
        b.extend_from_slice(
            &NetAddrNoPrefix::new(self.services, self.host, self.port).to_bytes(),
        );
        b
    }

    pub fn read(r: &mut Reader<'_>) -> NetworkResult<Self> {
        let timestamp = r.read_u64()?;
        let stream = r.read_u32()?;
        let n = NetAddrNoPrefix::read(r)?;
        Ok(Self {
            timestamp,
            stream,
            services: n.services,
            host: n.host,
            port: n.port,
        })
    }

    /// The pool form of this record.
    pub fn peer_addr(&self) -> PeerAddr {
        PeerAddr::ip(self.host.to_string(), self.port)
    }
}

/// Parses a host string the way the codec will re-encode it.
pub fn parse_host(host: &str) -> Option<IpAddr> {
    host.parse::<IpAddr>().ok().map(|ip| match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    })
}

/// `::ffff:127.0.0.1` as an [`IpAddr`], the placeholder "local" address in
/// `version` payloads.
pub fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_no_prefix(addr: &NetAddrNoPrefix) -> NetAddrNoPrefix {
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), NET_ADDR_NO_PREFIX_LEN);
        let mut r = Reader::new("addr", &bytes);
        let out = NetAddrNoPrefix::read(&mut r).unwrap();
        assert!(r.is_empty());
        out
    }

    #[test]
    fn test_ipv4_mapped_layout() {
        let addr = NetAddrNoPrefix::new(1, "127.0.0.1".parse().unwrap(), 8444);
        assert_eq!(
            &addr.to_bytes()[8..24],
            &hex::decode("00000000000000000000ffff7f000001").unwrap()[..]
        );
        let addr = NetAddrNoPrefix::new(1, "191.168.1.1".parse().unwrap(), 8444);
        assert_eq!(
            &addr.to_bytes()[8..24],
            &hex::decode("00000000000000000000ffffbfa80101").unwrap()[..]
        );
        let addr = NetAddrNoPrefix::new(1, "1.1.1.1".parse().unwrap(), 8444);
        assert_eq!(
            &addr.to_bytes()[8..24],
            &hex::decode("00000000000000000000ffff01010101").unwrap()[..]
        );
    }

    #[test]
    fn test_ipv6_passthrough() {
        let addr = NetAddrNoPrefix::new(
            1,
            "0102:0304:0506:0708:090A:0B0C:0D0E:0F10".parse().unwrap(),
            8444,
        );
        assert_eq!(
            &addr.to_bytes()[8..24],
            &hex::decode("0102030405060708090a0b0c0d0e0f10").unwrap()[..]
        );
    }

    #[test]
    fn test_no_prefix_roundtrip() {
        for host in ["127.0.0.1", "8.8.8.8", "2001:db8::1"] {
            let addr = NetAddrNoPrefix::new(3, host.parse().unwrap(), 8444);
            assert_eq!(roundtrip_no_prefix(&addr), addr);
        }
    }

    #[test]
    fn test_net_addr_roundtrip() {
        let addr = NetAddr::new(1, "93.184.216.34".parse().unwrap(), 8444, 1);
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), NET_ADDR_LEN);
        let mut r = Reader::new("addr", &bytes);
        let out = NetAddr::read(&mut r).unwrap();
        assert_eq!(out, addr);
    }
}

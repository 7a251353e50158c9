//! Typed message payloads.

use std::collections::HashSet;
use std::net::IpAddr;

use crate::config::{unix_now, NetworkConfig, MAX_VERSION_STREAMS};
use crate::error::{NetworkError, NetworkResult};

use super::address::{localhost, NetAddr, NetAddrNoPrefix, NET_ADDR_LEN};
use super::header::Command;
use super::object::Object;
use super::reader::Reader;
use super::varint;

/// Longest tolerated user agent in a `version` payload
const MAX_USER_AGENT: usize = 5000;

/// Soft cap on decoded `addr` records; the advertised count itself is not
/// validated (duplicate records legitimately collapse into a set)
const MAX_ADDR_RECORDS: usize = 1000;

/// Identifying vector of an object
pub type Vector = [u8; 32];

/// The `version` handshake payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    pub protocol_version: u32,
    pub services: u64,
    pub timestamp: u64,
    /// The address of the node being addressed, as the sender sees it
    pub remote: NetAddrNoPrefix,
    /// The sender's own (placeholder) address
    pub local: NetAddrNoPrefix,
    pub nonce: [u8; 8],
    pub user_agent: Vec<u8>,
    pub streams: Vec<u64>,
}

impl VersionPayload {
    /// Builds our own announcement towards `remote_host:remote_port`.
    pub fn new(
        config: &NetworkConfig,
        nonce: [u8; 8],
        remote_host: IpAddr,
        remote_port: u16,
    ) -> Self {
        Self {
            protocol_version: config.protocol_version,
            services: config.services,
            timestamp: unix_now(),
            remote: NetAddrNoPrefix::new(1, remote_host, remote_port),
            local: NetAddrNoPrefix::new(config.services, localhost(), config.listen_port),
            nonce,
            user_agent: config.user_agent.clone(),
            streams: vec![config.stream],
        }
    }
}

/// Typed payloads of every command we speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Version(VersionPayload),
    Verack,
    Addr { addresses: HashSet<NetAddr> },
    Inv { vectors: HashSet<Vector> },
    GetData { vectors: HashSet<Vector> },
    Object(Object),
    Ping,
    Pong,
    Error(ErrorPayload),
}

/// The `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorPayload {
    pub fatal: u64,
    pub ban_time: u64,
    pub vector: Vec<u8>,
    pub text: Vec<u8>,
}

impl ErrorPayload {
    /// A fatal error that also asks the peer to back off.
    pub fn fatal<S: Into<Vec<u8>>>(text: S, ban_time: u64) -> Self {
        Self {
            fatal: 2,
            ban_time,
            vector: Vec::new(),
            text: text.into(),
        }
    }
}

impl Payload {
    /// The command this payload travels under.
    pub fn command(&self) -> Command {
        match self {
            Payload::Version(_) => Command::Version,
            Payload::Verack => Command::Verack,
            Payload::Addr { .. } => Command::Addr,
            Payload::Inv { .. } => Command::Inv,
            Payload::GetData { .. } => Command::GetData,
            Payload::Object(_) => Command::Object,
            Payload::Ping => Command::Ping,
            Payload::Pong => Command::Pong,
            Payload::Error(_) => Command::Error,
        }
    }

    /// Serializes the payload body (header not included).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Version(v) => {
                let mut b = Vec::new();
                b.extend_from_slice(&v.protocol_version.to_be_bytes());
                b.extend_from_slice(&v.services.to_be_bytes());
                b.extend_from_slice(&v.timestamp.to_be_bytes());
                b.extend_from_slice(&v.remote.to_bytes());
                b.extend_from_slice(&v.local.to_bytes());
                b.extend_from_slice(&v.nonce);
                b.extend_from_slice(&varint::encode(v.user_agent.len() as u64));
                b.extend_from_slice(&v.user_agent);
                let streams = &v.streams[..v.streams.len().min(MAX_VERSION_STREAMS)];
                b.extend_from_slice(&varint::encode(streams.len() as u64));
                for stream in streams {
                    b.extend_from_slice(&varint::encode(*stream));
                }
                b
            }
            Payload::Verack | Payload::Ping | Payload::Pong => Vec::new(),
            Payload::Addr { addresses } => {
                let mut b = varint::encode(addresses.len() as u64);
                for addr in addresses {
                    b.extend_from_slice(&addr.to_bytes());
                }
                b
            }
            Payload::Inv { vectors } | Payload::GetData { vectors } => {
                let mut b = varint::encode(vectors.len() as u64);
                for vector in vectors {
                    b.extend_from_slice(vector);
                }
                b
            }
            Payload::Object(obj) => obj.to_bytes(),
            Payload::Error(e) => {
                let mut b = varint::encode(e.fatal);
                b.extend_from_slice(&varint::encode(e.ban_time));
                b.extend_from_slice(&varint::encode(e.vector.len() as u64));
                b.extend_from_slice(&e.vector);
                b.extend_from_slice(&varint::encode(e.text.len() as u64));
                b.extend_from_slice(&e.text);
                b
            }
        }
    }

    /// Decodes the payload for `command`. Unknown commands are passed
    /// through by the caller and never reach this function.
    pub fn from_bytes(command: &Command, payload: &[u8]) -> NetworkResult<Self> {
        match command {
            Command::Version => Self::decode_version(payload),
            Command::Verack => Ok(Payload::Verack),
            Command::Ping => Ok(Payload::Ping),
            Command::Pong => Ok(Payload::Pong),
            Command::Addr => Self::decode_addr(payload),
            Command::Inv => {
                Ok(Payload::Inv {
                    vectors: Self::decode_vectors("inv", payload)?,
                })
            }
            Command::GetData => {
                Ok(Payload::GetData {
                    vectors: Self::decode_vectors("getdata", payload)?,
                })
            }
            Command::Object => Ok(Payload::Object(Object::from_payload(payload)?)),
            Command::Error => Self::decode_error(payload),
            Command::Unknown(name) => Err(NetworkError::malformed(name, "unknown command")),
        }
    }

    fn decode_version(payload: &[u8]) -> NetworkResult<Self> {
        let mut r = Reader::new("version", payload);
        let protocol_version = r.read_u32()?;
        let services = r.read_u64()?;
        let timestamp = r.read_u64()?;
        let remote = NetAddrNoPrefix::read(&mut r)?;
        let local = NetAddrNoPrefix::read(&mut r)?;
        let nonce: [u8; 8] = r.read_array()?;
        let user_agent = r.read_var_bytes(MAX_USER_AGENT)?.to_vec();
        let streams_count = r.read_var_int()?;
        if streams_count > MAX_VERSION_STREAMS as u64 {
            return Err(NetworkError::malformed("version", "too many streams"));
        }
        let mut streams = Vec::new();
        while !r.is_empty() {
            streams.push(r.read_var_int()?);
        }
        if streams_count != streams.len() as u64 {
            return Err(NetworkError::malformed("version", "wrong streams count"));
        }
        Ok(Payload::Version(VersionPayload {
            protocol_version,
            services,
            timestamp,
            remote,
            local,
            nonce,
            user_agent,
            streams,
        }))
    }

    fn decode_addr(payload: &[u8]) -> NetworkResult<Self> {
        let mut r = Reader::new("addr", payload);
        // The advertised count is deliberately not validated
        let _ = r.read_var_int()?;
        let mut addresses = HashSet::new();
        while r.remaining() >= NET_ADDR_LEN {
            addresses.insert(NetAddr::read(&mut r)?);
            if addresses.len() > MAX_ADDR_RECORDS {
                return Err(NetworkError::malformed("addr", "too many records"));
            }
        }
        if !r.is_empty() {
            return Err(NetworkError::malformed("addr", "trailing bytes"));
        }
        Ok(Payload::Addr { addresses })
    }

    fn decode_vectors(command: &'static str, payload: &[u8]) -> NetworkResult<HashSet<Vector>> {
        let mut r = Reader::new(command, payload);
        let count = r.read_var_int()?;
        let mut vectors = HashSet::new();
        while !r.is_empty() {
            vectors.insert(r.read_array::<32>()?);
        }
        if count != vectors.len() as u64 {
            return Err(NetworkError::malformed(command, "wrong vector count"));
        }
        Ok(vectors)
    }

    fn decode_error(payload: &[u8]) -> NetworkResult<Self> {
        let mut r = Reader::new("error", payload);
        let fatal = r.read_var_int()?;
        let ban_time = r.read_var_int()?;
        let vector = r.read_var_bytes(64)?.to_vec();
        let text = r.read_var_bytes(4096)?.to_vec();
        Ok(Payload::Error(ErrorPayload {
            fatal,
            ban_time,
            vector,
            text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    fn reference_version_frame() -> Vec<u8> {
        // Captured reference handshake: protocol 3, services 3,
        // 127.0.0.1:8444, /PyBitmessage:0.6.3.2/, streams [1, 2, 3]
        hex::decode(concat!(
            "e9beb4d976657273696f6e00000000000000006b9e6a70ae",
            "0000000300000000000000030000000060f420b3",
            "000000000000000100000000000000000000ffff7f00000120fc",
            "000000000000000300000000000000000000ffff7f00000120fc",
            "00112233aabbccdd",
            "162f50794269746d6573736167653a302e362e332e322f",
            "03010203"
        ))
        .unwrap()
    }

    #[test]
    fn test_version_reference_decode() {
        let frame = reference_version_frame();
        let payload = Payload::from_bytes(&Command::Version, &frame[24..]).unwrap();
        let Payload::Version(v) = payload else {
            panic!("not a version payload");
        };
        assert_eq!(v.protocol_version, 3);
        assert_eq!(v.services, 3);
        assert_eq!(v.remote.host.to_string(), "127.0.0.1");
        assert_eq!(v.remote.port, 8444);
        assert_eq!(v.user_agent, b"/PyBitmessage:0.6.3.2/");
        assert_eq!(v.streams, vec![1, 2, 3]);
        // The decoded timestamp is preserved, so re-encoding reproduces
        // the reference payload byte for byte
        assert_eq!(Payload::Version(v).to_bytes(), &frame[24..]);
    }

    #[test]
    fn test_version_stream_count_must_match() {
        let frame = reference_version_frame();
        let mut payload = frame[24..].to_vec();
        let count_at = payload.len() - 4;
        payload[count_at] = 4;
        assert!(Payload::from_bytes(&Command::Version, &payload).is_err());
    }

    #[test]
    fn test_addr_identical_records_collapse() {
        // 500 identical records advertised under an honest count of 500
        let record = hex::decode(
            "0000000060f420b300000001000000000000000100000000000000000000ffff7f00000120fc",
        )
        .unwrap();
        let mut payload = varint::encode(500);
        for _ in 0..500 {
            payload.extend_from_slice(&record);
        }
        let decoded = Payload::from_bytes(&Command::Addr, &payload).unwrap();
        let Payload::Addr { addresses } = decoded else {
            panic!("not an addr payload");
        };
        assert_eq!(addresses.len(), 1);
        let addr = addresses.into_iter().next().unwrap();
        assert_eq!(addr.stream, 1);
        assert_eq!(addr.services, 1);
        assert_eq!(addr.host.to_string(), "127.0.0.1");
        assert_eq!(addr.port, 8444);
    }

    #[test]
    fn test_inv_count_validated() {
        let mut payload = varint::encode(2);
        payload.extend_from_slice(&[0xaa; 32]);
        assert!(Payload::from_bytes(&Command::Inv, &payload).is_err());

        let mut payload = varint::encode(1);
        payload.extend_from_slice(&[0xaa; 32]);
        let decoded = Payload::from_bytes(&Command::Inv, &payload).unwrap();
        assert_eq!(
            decoded,
            Payload::Inv {
                vectors: [[0xaa; 32]].into_iter().collect()
            }
        );
    }

    #[test]
    fn test_getdata_roundtrip() {
        let vectors: HashSet<Vector> = [[1u8; 32], [2u8; 32], [3u8; 32]].into_iter().collect();
        let payload = Payload::GetData {
            vectors: vectors.clone(),
        };
        let decoded = Payload::from_bytes(&Command::GetData, &payload.to_bytes()).unwrap();
        assert_eq!(
            decoded,
            Payload::GetData { vectors }
        );
    }

    #[test]
    fn test_error_reference_bytes() {
        let payload = hex::decode(concat!(
            "02000036",
            "546f6f206d616e7920636f6e6e656374696f6e732066726f6d20796f75722049502e",
            "20436c6f73696e6720636f6e6e656374696f6e2e"
        ))
        .unwrap();
        let decoded = Payload::from_bytes(&Command::Error, &payload).unwrap();
        let Payload::Error(e) = &decoded else {
            panic!("not an error payload");
        };
        assert_eq!(e.fatal, 2);
        assert_eq!(e.ban_time, 0);
        assert!(e.vector.is_empty());
        assert_eq!(
            e.text,
            b"Too many connections from your IP. Closing connection."
        );
        assert_eq!(decoded.to_bytes(), payload);
    }

    #[test]
    fn test_version_payload_new() {
        let config = NetworkConfig::default();
        let v = VersionPayload::new(&config, [9u8; 8], "8.8.8.8".parse().unwrap(), 8444);
        assert_eq!(v.protocol_version, 3);
        assert_eq!(v.streams, vec![config.stream]);
        let encoded = Payload::Version(v.clone()).to_bytes();
        let decoded = Payload::from_bytes(&Command::Version, &encoded).unwrap();
        assert_eq!(decoded, Payload::Version(v));
    }
}

//! Wire protocol: framing, primitives and typed payloads.
//!
//! Everything on the wire is big-endian. A frame is a 24-byte
//! [`MessageHeader`] followed by the payload; the payload formats live in
//! [`protocol`].

pub mod address;
pub mod header;
pub mod object;
pub mod protocol;
pub mod reader;
pub mod varint;

pub use address::{NetAddr, NetAddrNoPrefix};
pub use header::{checksum, Command, MessageHeader, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use object::Object;
pub use protocol::{ErrorPayload, Payload, Vector, VersionPayload};

use crate::error::NetworkResult;

/// A complete frame: header plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

impl Message {
    /// Frames a typed payload.
    pub fn new(magic: u32, payload: &Payload) -> Self {
        let bytes = payload.to_bytes();
        Self {
            header: MessageHeader::new(magic, payload.command(), &bytes),
            payload: bytes,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = self.header.to_bytes();
        b.extend_from_slice(&self.payload);
        b
    }

    /// Parses and fully verifies a frame. Magic, length and checksum
    /// failures surface as their distinct error kinds.
    pub fn from_bytes(bytes: &[u8], magic: u32) -> NetworkResult<Self> {
        let header = MessageHeader::from_bytes(bytes, magic)?;
        let payload = bytes.get(HEADER_LEN..).unwrap_or_default().to_vec();
        header.validate(&payload)?;
        Ok(Self { header, payload })
    }

    /// Decodes the typed payload.
    pub fn decode(&self) -> NetworkResult<Payload> {
        Payload::from_bytes(&self.header.command, &self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAGIC;
    use crate::error::NetworkError;

    fn ping_frame() -> Vec<u8> {
        Message::new(DEFAULT_MAGIC, &Payload::Ping).to_bytes()
    }

    #[test]
    fn test_frame_roundtrip() {
        let payload = Payload::Error(ErrorPayload::fatal("go away", 60));
        let message = Message::new(DEFAULT_MAGIC, &payload);
        let parsed = Message::from_bytes(&message.to_bytes(), DEFAULT_MAGIC).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.decode().unwrap(), payload);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = ping_frame();
        bytes[1] ^= 0x01;
        assert!(matches!(
            Message::from_bytes(&bytes, DEFAULT_MAGIC).unwrap_err(),
            NetworkError::BadMagic { .. }
        ));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let payload = Payload::Inv {
            vectors: [[5u8; 32]].into_iter().collect(),
        };
        let bytes = Message::new(DEFAULT_MAGIC, &payload).to_bytes();
        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            Message::from_bytes(truncated, DEFAULT_MAGIC).unwrap_err(),
            NetworkError::LengthMismatch { .. }
        ));
    }

    #[test]
    fn test_flipped_payload_rejected() {
        let payload = Payload::Inv {
            vectors: [[5u8; 32]].into_iter().collect(),
        };
        let bytes = Message::new(DEFAULT_MAGIC, &payload).to_bytes();
        for i in HEADER_LEN..bytes.len() {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0x80;
            assert!(
                matches!(
                    Message::from_bytes(&corrupted, DEFAULT_MAGIC).unwrap_err(),
                    NetworkError::ChecksumMismatch
                ),
                "payload byte {} not caught",
                i
            );
        }
        // Sanity: the untouched frame still parses
        assert!(Message::from_bytes(&bytes, DEFAULT_MAGIC).is_ok());
    }
}

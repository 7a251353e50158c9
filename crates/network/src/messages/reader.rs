//! Cursor over a received payload.

use crate::error::{NetworkError, NetworkResult};

use super::varint;

/// Sequential reader used by the payload decoders. Every read checks the
/// remaining length and fails with a malformed-payload error naming the
/// command being decoded.
pub struct Reader<'a> {
    command: &'static str,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader over `buf` for diagnostics under `command`.
    pub fn new(command: &'static str, buf: &'a [u8]) -> Self {
        Self {
            command,
            buf,
            pos: 0,
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True when the whole buffer has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn err<S: Into<String>>(&self, reason: S) -> NetworkError {
        NetworkError::malformed(self.command, reason)
    }

    /// Reads `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> NetworkResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.err(format!("need {} bytes, have {}", n, self.remaining())));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Reads a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> NetworkResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> NetworkResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> NetworkResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> NetworkResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> NetworkResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Reads a varint.
    pub fn read_var_int(&mut self) -> NetworkResult<u64> {
        let (n, consumed) = varint::decode(&self.buf[self.pos..])
            .map_err(|e| self.err(format!("bad varint: {}", e)))?;
        self.pos += consumed;
        Ok(n)
    }

    /// Reads a varint-length-prefixed byte string, rejecting lengths above
    /// `max`.
    pub fn read_var_bytes(&mut self, max: usize) -> NetworkResult<&'a [u8]> {
        let len = self.read_var_int()?;
        if len > max as u64 {
            return Err(self.err(format!("length {} over cap {}", len, max)));
        }
        self.read_bytes(len as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_sequence() {
        let buf = [
            0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0xfd, 0x01, 0x00, 0x02, b'h', b'i',
        ];
        let mut r = Reader::new("test", &buf);
        assert_eq!(r.read_u8().unwrap(), 1);
        assert_eq!(r.read_u16().unwrap(), 2);
        assert_eq!(r.read_u32().unwrap(), 3);
        assert_eq!(r.read_var_int().unwrap(), 256);
        assert_eq!(r.read_var_bytes(16).unwrap(), b"hi");
        assert!(r.is_empty());
    }

    #[test]
    fn test_reader_underflow() {
        let mut r = Reader::new("test", &[0x01]);
        assert!(r.read_u32().is_err());
    }

    #[test]
    fn test_var_bytes_cap() {
        let buf = [0x05, b'a', b'b', b'c', b'd', b'e'];
        let mut r = Reader::new("test", &buf);
        assert!(r.read_var_bytes(4).is_err());
    }
}

//! I2P destination key helpers.

use base64::alphabet::Alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{NetworkError, NetworkResult};

/// The I2P flavor of base64: standard alphabet with `+/` replaced by `-~`.
fn engine() -> GeneralPurpose {
    // The alphabet is valid by construction
    let alphabet = Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~")
        .unwrap_or_else(|_| unreachable!());
    GeneralPurpose::new(&alphabet, GeneralPurposeConfig::new())
}

/// Decodes an I2P base64 destination.
pub fn decode_destination(dest: &str) -> NetworkResult<Vec<u8>> {
    engine()
        .decode(dest)
        .map_err(|e| NetworkError::sam(format!("bad destination encoding: {}", e)))
}

/// Encodes raw key bytes into I2P base64.
pub fn encode_destination(raw: &[u8]) -> String {
    engine().encode(raw)
}

/// Derives the public destination from a private key blob: 256 bytes of
/// public key, 128 of signing key, 3 of certificate header, plus the
/// certificate payload whose length sits at bytes 385..387.
pub fn pub_from_priv(priv_dest: &str) -> NetworkResult<String> {
    let raw = decode_destination(priv_dest)?;
    if raw.len() < 387 {
        return Err(NetworkError::sam("private destination too short"));
    }
    let cert_len = u16::from_be_bytes([raw[385], raw[386]]) as usize;
    let pub_len = 387 + cert_len;
    if raw.len() < pub_len {
        return Err(NetworkError::sam("private destination truncated"));
    }
    Ok(encode_destination(&raw[..pub_len]))
}

/// The `.b32.i2p` short form: unpadded lowercase base32 of SHA-256 over
/// the decoded public destination.
pub fn b32_from_pub(pub_dest: &str) -> NetworkResult<String> {
    let raw = decode_destination(pub_dest)?;
    let digest = Sha256::digest(&raw);
    Ok(format!("{}.b32.i2p", base32_encode(&digest)))
}

/// RFC 4648 base32, lowercase, no padding. The ecosystem carries no
/// tiny base32 crate in our stack, so the 20 lines live here.
fn base32_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut acc: u64 = 0;
    let mut bits = 0u32;
    for &byte in data {
        acc = (acc << 8) | byte as u64;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((acc << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_roundtrip() {
        let raw: Vec<u8> = (0..=255).collect();
        let encoded = encode_destination(&raw);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(decode_destination(&encoded).unwrap(), raw);
    }

    #[test]
    fn test_pub_from_priv() {
        // 387-byte public part with an empty certificate, followed by
        // 40 bytes of private signing key material
        let mut raw = vec![0xaa_u8; 387 + 40];
        raw[385] = 0;
        raw[386] = 0;
        let priv_dest = encode_destination(&raw);
        let pub_dest = pub_from_priv(&priv_dest).unwrap();
        assert_eq!(decode_destination(&pub_dest).unwrap(), raw[..387].to_vec());

        // A 7-byte certificate payload extends the public part
        raw[386] = 7;
        let priv_dest = encode_destination(&raw);
        let pub_dest = pub_from_priv(&priv_dest).unwrap();
        assert_eq!(decode_destination(&pub_dest).unwrap().len(), 394);
    }

    #[test]
    fn test_pub_from_priv_too_short() {
        let priv_dest = encode_destination(&[0u8; 100]);
        assert!(pub_from_priv(&priv_dest).is_err());
    }

    #[test]
    fn test_base32() {
        // RFC 4648 test vectors, lowercased and unpadded
        assert_eq!(base32_encode(b""), "");
        assert_eq!(base32_encode(b"f"), "my");
        assert_eq!(base32_encode(b"fo"), "mzxq");
        assert_eq!(base32_encode(b"foo"), "mzxw6");
        assert_eq!(base32_encode(b"foobar"), "mzxw6ytboi");
    }

    #[test]
    fn test_b32_address_shape() {
        let pub_dest = encode_destination(&[0x42u8; 387]);
        let b32 = b32_from_pub(&pub_dest).unwrap();
        assert!(b32.ends_with(".b32.i2p"));
        // 32 hash bytes make 52 base32 characters
        assert_eq!(b32.len(), 52 + ".b32.i2p".len());
        assert!(!b32.contains('='));
    }
}

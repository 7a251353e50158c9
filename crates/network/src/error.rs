//! Error types for the bmnode network crate.

use thiserror::Error;

/// Network operation errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Frame carried the wrong magic bytes
    #[error("bad magic: expected {expected:#010x}, got {actual:#010x}")]
    BadMagic { expected: u32, actual: u32 },

    /// Frame payload length disagrees with the header
    #[error("wrong payload length: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Frame payload checksum disagrees with the header
    #[error("wrong payload checksum")]
    ChecksumMismatch,

    /// Frame exceeds the protocol size cap
    #[error("frame too large: {length} bytes")]
    FrameTooLarge { length: usize },

    /// Payload decoder failure
    #[error("malformed {command} payload: {reason}")]
    MalformedPayload { command: String, reason: String },

    /// Peer behavior violates protocol policy (skew, stream, self-connect, floods)
    #[error("policy violation: {reason}")]
    PolicyViolation { reason: String },

    /// Peer sent a fatal `error` message
    #[error("remote fatal error: {text}")]
    RemoteFatal { text: String },

    /// Socket-level failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// SAM bridge failure
    #[error("SAM error: {reason}")]
    Sam { reason: String },

    /// Persistence or other local resource failure
    #[error("resource error: {reason}")]
    Resource { reason: String },
}

impl NetworkError {
    /// Create a new malformed-payload error
    pub fn malformed<S: Into<String>>(command: &str, reason: S) -> Self {
        Self::MalformedPayload {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a new policy-violation error
    pub fn policy<S: Into<String>>(reason: S) -> Self {
        Self::PolicyViolation {
            reason: reason.into(),
        }
    }

    /// Create a new SAM error
    pub fn sam<S: Into<String>>(reason: S) -> Self {
        Self::Sam {
            reason: reason.into(),
        }
    }

    /// Create a new resource error
    pub fn resource<S: Into<String>>(reason: S) -> Self {
        Self::Resource {
            reason: reason.into(),
        }
    }

    /// True for malformed frames and payloads, which earn the peer a fatal
    /// `error` reply and a ban.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            NetworkError::BadMagic { .. }
                | NetworkError::LengthMismatch { .. }
                | NetworkError::ChecksumMismatch
                | NetworkError::FrameTooLarge { .. }
                | NetworkError::MalformedPayload { .. }
                | NetworkError::PolicyViolation { .. }
        )
    }
}

/// Result type for network operations
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(NetworkError::BadMagic {
            expected: 0xE9BEB4D9,
            actual: 0
        }
        .is_protocol_error());
        assert!(NetworkError::malformed("inv", "wrong vector count").is_protocol_error());
        assert!(NetworkError::policy("time offset too large").is_protocol_error());
        assert!(!NetworkError::sam("no reply").is_protocol_error());
        assert!(
            !NetworkError::Transport(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
                .is_protocol_error()
        );
    }

    #[test]
    fn test_error_display() {
        let err = NetworkError::BadMagic {
            expected: 0xE9BEB4D9,
            actual: 0xDEADBEEF,
        };
        assert!(err.to_string().contains("0xe9beb4d9"));
        assert!(err.to_string().contains("0xdeadbeef"));
    }
}

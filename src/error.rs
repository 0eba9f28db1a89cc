//! Error types for danmaku-relay.

use thiserror::Error;

/// Main error type for all relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// I/O error during accept/connect/read/write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (join-room body).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error (control messages).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error (control messages).
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Packet header violates a wire invariant.
    #[error("Malformed packet: {reason}")]
    MalformedPacket {
        /// What was wrong with the header.
        reason: String,
    },

    /// Occupied bytes would exceed the fixed stream buffer.
    #[error("Stream buffer exhausted: {needed} bytes needed, capacity {capacity}")]
    BufferExhausted {
        /// Bytes that would have to be held.
        needed: usize,
        /// Fixed buffer capacity.
        capacity: usize,
    },

    /// A packet exceeds the u32 length field or can never fit into the
    /// stream buffer.
    #[error("Packet of {length} bytes exceeds limit of {capacity} bytes")]
    PacketTooLarge {
        /// Declared total packet length.
        length: usize,
        /// Fixed buffer capacity.
        capacity: usize,
    },

    /// Control frame length prefix exceeds the configured maximum.
    #[error("Control frame of {length} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared payload length.
        length: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Outbound queue of a connection is full.
    #[error("Outbound queue full")]
    Backpressure,

    /// Failed to acquire a network resource at startup.
    #[error("Resource initialization failed: {0}")]
    ResourceInit(String),

    /// Invalid configuration supplied by the operator.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        RelayError::MalformedPacket {
            reason: reason.into(),
        }
    }

    /// True for header-invariant violations on the chat stream.
    pub fn is_malformed(&self) -> bool {
        matches!(self, RelayError::MalformedPacket { .. })
    }

    /// True when the underlying link is unusable and should be torn down.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RelayError::Io(_) | RelayError::ConnectionClosed | RelayError::Backpressure
        )
    }
}

/// Result type alias using RelayError.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RelayError::malformed("bad").is_malformed());
        assert!(!RelayError::malformed("bad").is_transport());

        let io = RelayError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "gone",
        ));
        assert!(io.is_transport());
        assert!(RelayError::ConnectionClosed.is_transport());
        assert!(!RelayError::Config("x".into()).is_transport());
    }

    #[test]
    fn test_error_messages() {
        let err = RelayError::BufferExhausted {
            needed: 20,
            capacity: 16,
        };
        assert_eq!(
            err.to_string(),
            "Stream buffer exhausted: 20 bytes needed, capacity 16"
        );
        assert!(RelayError::malformed("header length 12")
            .to_string()
            .contains("header length 12"));
    }
}

//! Chat-service wire header encoding and decoding.
//!
//! Implements the 16-byte packet header:
//! ```text
//! ┌──────────┬────────────┬──────────┬──────────┬──────────┐
//! │ Length   │ Header len │ Proto ver│ Op code  │ Seq ID   │
//! │ 4 bytes  │ 2 bytes    │ 2 bytes  │ 4 bytes  │ 4 bytes  │
//! │ uint32 BE│ uint16 BE  │ uint16 BE│ uint32 BE│ uint32 BE│
//! └──────────┴────────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! `length` is the total packet size, header included. All multi-byte
//! integers are Big Endian on the wire and native once decoded.

use crate::error::{RelayError, Result};

/// Header size in bytes (fixed, exactly 16).
pub const HEADER_SIZE: usize = 16;

/// Value every well-formed header carries in `header_length`.
pub const HEADER_LENGTH: u16 = HEADER_SIZE as u16;

/// Sequence id used for packets we originate.
pub const DEFAULT_SEQUENCE_ID: u32 = 1;

/// Packet operation codes.
///
/// Codes outside the known set are preserved as [`OpCode::Unknown`] so that
/// framing never fails on an op the consumer simply ignores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Client heartbeat (2).
    Heartbeat,
    /// Heartbeat reply carrying the popularity counter (3).
    HeartbeatResp,
    /// Chat event payload (5).
    JsonMessage,
    /// Join-room request (7).
    JoinRoom,
    /// Join-room acknowledgement (8).
    JoinRoomResp,
    /// Any other op code.
    Unknown(u32),
}

impl OpCode {
    /// Raw wire value.
    pub fn as_u32(self) -> u32 {
        match self {
            OpCode::Heartbeat => 2,
            OpCode::HeartbeatResp => 3,
            OpCode::JsonMessage => 5,
            OpCode::JoinRoom => 7,
            OpCode::JoinRoomResp => 8,
            OpCode::Unknown(raw) => raw,
        }
    }
}

impl From<u32> for OpCode {
    fn from(raw: u32) -> Self {
        match raw {
            2 => OpCode::Heartbeat,
            3 => OpCode::HeartbeatResp,
            5 => OpCode::JsonMessage,
            7 => OpCode::JoinRoom,
            8 => OpCode::JoinRoomResp,
            other => OpCode::Unknown(other),
        }
    }
}

/// How a packet payload is to be interpreted by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Plain JSON body (0).
    Json,
    /// Popularity counter only (1).
    Popularity,
    /// zlib-compressed batch of inner packets (2).
    ZlibCompressed,
    /// Any other version.
    Unknown(u16),
}

impl ProtocolVersion {
    /// Raw wire value.
    pub fn as_u16(self) -> u16 {
        match self {
            ProtocolVersion::Json => 0,
            ProtocolVersion::Popularity => 1,
            ProtocolVersion::ZlibCompressed => 2,
            ProtocolVersion::Unknown(raw) => raw,
        }
    }
}

impl From<u16> for ProtocolVersion {
    fn from(raw: u16) -> Self {
        match raw {
            0 => ProtocolVersion::Json,
            1 => ProtocolVersion::Popularity,
            2 => ProtocolVersion::ZlibCompressed,
            other => ProtocolVersion::Unknown(other),
        }
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet length including this header.
    pub length: u32,
    /// Header length; always [`HEADER_LENGTH`] for valid packets.
    pub header_length: u16,
    /// Payload interpretation.
    pub protocol_version: ProtocolVersion,
    /// Operation code.
    pub op_code: OpCode,
    /// Sequence identifier.
    pub sequence_id: u32,
}

impl PacketHeader {
    /// Create a header for a packet with `payload_len` payload bytes.
    ///
    /// # Errors
    ///
    /// Returns `PacketTooLarge` if the total length does not fit the u32
    /// `length` field.
    pub fn new(
        op_code: OpCode,
        protocol_version: ProtocolVersion,
        payload_len: usize,
    ) -> Result<Self> {
        let total = HEADER_SIZE.saturating_add(payload_len);
        let length = u32::try_from(total).map_err(|_| RelayError::PacketTooLarge {
            length: total,
            capacity: u32::MAX as usize,
        })?;
        Ok(Self {
            length,
            header_length: HEADER_LENGTH,
            protocol_version,
            op_code,
            sequence_id: DEFAULT_SEQUENCE_ID,
        })
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use danmaku_relay::protocol::{OpCode, PacketHeader, ProtocolVersion};
    ///
    /// let header = PacketHeader::new(OpCode::Heartbeat, ProtocolVersion::Popularity, 0).unwrap();
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 16);
    /// assert_eq!(&bytes[0..4], &[0, 0, 0, 16]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (16 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.header_length.to_be_bytes());
        buf[6..8].copy_from_slice(&self.protocol_version.as_u16().to_be_bytes());
        buf[8..12].copy_from_slice(&self.op_code.as_u32().to_be_bytes());
        buf[12..16].copy_from_slice(&self.sequence_id.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short. No validation is performed;
    /// see [`PacketHeader::validate`].
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            header_length: u16::from_be_bytes([buf[4], buf[5]]),
            protocol_version: u16::from_be_bytes([buf[6], buf[7]]).into(),
            op_code: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]).into(),
            sequence_id: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    /// Validate the header invariants.
    ///
    /// Checks:
    /// - `header_length` equals the fixed header size
    /// - `length` covers at least the header
    pub fn validate(&self) -> Result<()> {
        if self.header_length != HEADER_LENGTH {
            return Err(RelayError::malformed(format!(
                "header length {} (expected {})",
                self.header_length, HEADER_LENGTH
            )));
        }

        if (self.length as usize) < HEADER_SIZE {
            return Err(RelayError::malformed(format!(
                "packet length {} shorter than header",
                self.length
            )));
        }

        Ok(())
    }

    /// Payload length implied by the header.
    #[inline]
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(self.header_length as usize)
    }
}

/// Decode and validate a header in one step.
pub fn decode_header(buf: &[u8]) -> Result<Option<PacketHeader>> {
    match PacketHeader::decode(buf) {
        Some(header) => {
            header.validate()?;
            Ok(Some(header))
        }
        None => Ok(None),
    }
}

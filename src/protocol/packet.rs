//! Packet types and outbound packet builders.
//!
//! A packet is a [`PacketHeader`] followed by `length - header_length`
//! payload bytes. [`PacketView`] borrows a packet straight out of a stream
//! buffer; [`Packet`] owns its payload via `bytes::Bytes`.
//!
//! # Example
//!
//! ```
//! use danmaku_relay::protocol::{build_join_room, decode_packet, OpCode, ProtocolVersion};
//!
//! let bytes = build_join_room(5, ProtocolVersion::ZlibCompressed).unwrap();
//! let view = decode_packet(&bytes).unwrap();
//!
//! assert_eq!(view.header.op_code, OpCode::JoinRoom);
//! assert_eq!(view.join_room_body().unwrap().protover, 2);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::wire_format::{
    decode_header, OpCode, PacketHeader, ProtocolVersion, DEFAULT_SEQUENCE_ID, HEADER_LENGTH,
    HEADER_SIZE,
};
use crate::error::{RelayError, Result};

/// A packet borrowed from a buffer. Valid only while the buffer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketView<'a> {
    /// Decoded header.
    pub header: PacketHeader,
    /// Payload span (header excluded).
    pub payload: &'a [u8],
}

impl<'a> PacketView<'a> {
    /// Operation code of this packet.
    #[inline]
    pub fn op_code(&self) -> OpCode {
        self.header.op_code
    }

    /// Payload interpretation selector.
    #[inline]
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.header.protocol_version
    }

    /// Copy the payload out into an owned [`Packet`].
    pub fn to_packet(&self) -> Packet {
        Packet {
            header: self.header,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }

    /// Popularity counter carried by a `heartbeat_resp` packet.
    ///
    /// Returns `None` for other op codes or a payload shorter than 4 bytes.
    pub fn popularity(&self) -> Option<u32> {
        if self.header.op_code != OpCode::HeartbeatResp || self.payload.len() < 4 {
            return None;
        }
        Some(u32::from_be_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]))
    }

    /// Parse the JSON body of a join-room packet.
    pub fn join_room_body(&self) -> Result<JoinRoomBody> {
        if self.header.op_code != OpCode::JoinRoom {
            return Err(RelayError::malformed(format!(
                "expected join_room, got op code {}",
                self.header.op_code.as_u32()
            )));
        }
        Ok(serde_json::from_slice(self.payload)?)
    }
}

/// A complete packet with an owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Decoded header.
    pub header: PacketHeader,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet; the header length is derived from the payload.
    ///
    /// # Errors
    ///
    /// `PacketTooLarge` if the payload overflows the u32 length field.
    pub fn new(
        op_code: OpCode,
        protocol_version: ProtocolVersion,
        payload: Bytes,
    ) -> Result<Self> {
        Ok(Self {
            header: PacketHeader::new(op_code, protocol_version, payload.len())?,
            payload,
        })
    }

    /// Borrow as a [`PacketView`].
    #[inline]
    pub fn view(&self) -> PacketView<'_> {
        PacketView {
            header: self.header,
            payload: &self.payload,
        }
    }

    /// Encode header and payload into one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Body of a join-room request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomBody {
    /// Viewer uid; 0 joins anonymously.
    pub uid: u64,
    /// Room to join.
    pub roomid: u64,
    /// Requested protocol version for pushed messages.
    pub protover: u16,
}

impl JoinRoomBody {
    /// Requested protocol version as an enum.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protover.into()
    }
}

/// Build a heartbeat packet: header only.
pub fn build_heartbeat() -> Bytes {
    let header = PacketHeader {
        length: HEADER_LENGTH as u32,
        header_length: HEADER_LENGTH,
        protocol_version: ProtocolVersion::Popularity,
        op_code: OpCode::Heartbeat,
        sequence_id: DEFAULT_SEQUENCE_ID,
    };
    Bytes::copy_from_slice(&header.encode())
}

/// Build a join-room packet for `room_id`, asking the service to push
/// messages using `protover`.
pub fn build_join_room(room_id: u64, protover: ProtocolVersion) -> Result<Bytes> {
    let body = JoinRoomBody {
        uid: 0,
        roomid: room_id,
        protover: protover.as_u16(),
    };
    let payload = serde_json::to_vec(&body)?;
    Ok(Packet::new(OpCode::JoinRoom, ProtocolVersion::Json, Bytes::from(payload))?.to_bytes())
}

/// Decode one complete packet from the front of `buf`.
///
/// Bytes past `header.length` are ignored. A truncated packet is reported
/// as malformed; use the stream framer for partial input.
pub fn decode_packet(buf: &[u8]) -> Result<PacketView<'_>> {
    let header = decode_header(buf)?.ok_or_else(|| {
        RelayError::malformed(format!("{} bytes is shorter than a header", buf.len()))
    })?;

    let length = header.length as usize;
    if buf.len() < length {
        return Err(RelayError::malformed(format!(
            "packet declares {} bytes, only {} available",
            length,
            buf.len()
        )));
    }

    Ok(PacketView {
        header,
        payload: &buf[header.header_length as usize..length],
    })
}

//! Protocol module - chat-service wire format and stream framing.
//!
//! This module implements the binary protocol spoken to the chat service:
//! - 16-byte big-endian header encoding/decoding
//! - Heartbeat and join-room packet builders
//! - Stream framer that reassembles packets from arbitrary read chunks

mod packet;
mod stream_framer;
mod wire_format;

pub use packet::{
    build_heartbeat, build_join_room, decode_packet, JoinRoomBody, Packet, PacketView,
};
pub use stream_framer::{advance, Advance, PacketSink, StreamBuffer};
pub use wire_format::{
    decode_header, OpCode, PacketHeader, ProtocolVersion, DEFAULT_SEQUENCE_ID, HEADER_LENGTH,
    HEADER_SIZE,
};

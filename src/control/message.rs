//! Control messages carried inside control frames.
//!
//! The worker opens the link with [`ControlMessage::Hello`], then the
//! supervisor assigns rooms with `OpenRoom`/`CloseRoom` and the worker
//! reports back with `RoomMessage`/`RoomFailed`. An idle worker sends
//! `Heartbeat` periodically so the supervisor can tell it is alive.
//!
//! # Example
//!
//! ```
//! use danmaku_relay::control::ControlMessage;
//!
//! let msg = ControlMessage::OpenRoom { room_id: 5 };
//! let payload = msg.encode().unwrap();
//! assert_eq!(ControlMessage::decode(&payload).unwrap(), msg);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::framing::encode_control_frame;
use crate::codec::MsgPackCodec;
use crate::error::Result;

/// Control protocol version announced in `Hello`.
pub const CONTROL_PROTOCOL_VERSION: &str = "1.0.0";

/// A control-link message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Worker → supervisor, first message on a new link.
    Hello {
        /// Rooms this worker is willing to hold.
        max_rooms: u32,
        /// Control protocol version.
        version: String,
    },
    /// Worker → supervisor: still alive.
    Heartbeat,
    /// Supervisor → worker: start relaying a room.
    OpenRoom {
        /// Room to open.
        room_id: u64,
    },
    /// Supervisor → worker: stop relaying a room.
    CloseRoom {
        /// Room to close.
        room_id: u64,
    },
    /// Worker → supervisor: one chat packet from a room.
    RoomMessage {
        /// Source room.
        room_id: u64,
        /// Raw packet payload, uninterpreted.
        payload: Bytes,
    },
    /// Worker → supervisor: the room connection failed.
    RoomFailed {
        /// Failed room.
        room_id: u64,
    },
}

impl ControlMessage {
    /// Build the `Hello` a worker sends on connect.
    pub fn hello(max_rooms: u32) -> Self {
        ControlMessage::Hello {
            max_rooms,
            version: CONTROL_PROTOCOL_VERSION.to_string(),
        }
    }

    /// Encode as a control payload (no length prefix).
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(MsgPackCodec::encode(self)?))
    }

    /// Encode as a complete control frame (length prefix included).
    pub fn to_frame(&self) -> Result<Bytes> {
        Ok(encode_control_frame(&MsgPackCodec::encode(self)?))
    }

    /// Decode a control payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        MsgPackCodec::decode(payload)
    }

    /// Room this message refers to, if any.
    pub fn room_id(&self) -> Option<u64> {
        match self {
            ControlMessage::Hello { .. } | ControlMessage::Heartbeat => None,
            ControlMessage::OpenRoom { room_id }
            | ControlMessage::CloseRoom { room_id }
            | ControlMessage::RoomMessage { room_id, .. }
            | ControlMessage::RoomFailed { room_id } => Some(*room_id),
        }
    }
}

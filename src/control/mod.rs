//! Control channel - supervisor↔worker framing and messages.
//!
//! The control link is a plain byte stream (TCP). Every message is a
//! length-prefixed frame whose payload is a MessagePack-encoded
//! [`ControlMessage`].
//!
//! # Workflow
//!
//! 1. Worker connects to the supervisor listener
//! 2. Supervisor assigns a random worker id and notifies its policy
//! 3. Worker sends `Hello`
//! 4. Supervisor sends `OpenRoom` / `CloseRoom`
//! 5. Worker relays `RoomMessage` / `RoomFailed`

mod framing;
mod message;

pub use framing::{
    encode_control_frame, encode_length_prefix, ControlFrameBuffer, DEFAULT_MAX_CONTROL_FRAME,
    LENGTH_PREFIX_SIZE,
};
pub use message::{ControlMessage, CONTROL_PROTOCOL_VERSION};

//! Worker side: the control session toward the supervisor and the chat
//! room links it relays.

mod room;
mod session;

pub use room::{
    RoomConnection, RoomOptions, RoomRelay, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_ROOM_BUFFER,
};
pub use session::{RoomCommands, SessionBuilder, SessionHandle, WorkerSession};

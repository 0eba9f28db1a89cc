//! Codec module - serialization for control-channel payloads.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (struct-as-map)
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the codec is selected at compile time.

mod msgpack;

pub use msgpack::MsgPackCodec;

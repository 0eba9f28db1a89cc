//! MsgPack codec using `rmp-serde`.
//!
//! Control messages are encoded with `to_vec_named`, which writes structs
//! as maps keyed by field name rather than positional arrays. A worker and a
//! supervisor built from different revisions can then still read each
//! other's messages as long as the fields they care about are present.
//!
//! # Example
//!
//! ```
//! use danmaku_relay::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Assignment {
//!     room_id: u64,
//!     priority: u8,
//! }
//!
//! let msg = Assignment { room_id: 42, priority: 1 };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Assignment = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use crate::error::Result;

/// MessagePack codec for structured control payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct RoomState {
        room_id: u64,
        name: String,
        live: bool,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct RoomStateV0 {
        room_id: u64,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = RoomState {
            room_id: 21752681,
            name: "test".to_string(),
            live: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: RoomState = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let newer = RoomState {
            room_id: 7,
            name: "n".to_string(),
            live: false,
        };
        let encoded = MsgPackCodec::encode(&newer).unwrap();
        let older: RoomStateV0 = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(older, RoomStateV0 { room_id: 7 });
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<RoomState> = MsgPackCodec::decode(&[0xC1, 0x00]);
        assert!(matches!(
            result,
            Err(crate::error::RelayError::MsgPackDecode(_))
        ));
    }
}

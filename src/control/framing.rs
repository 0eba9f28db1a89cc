//! Length-prefixed framing for the supervisor↔worker control link.
//!
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ Length       │ Payload              │
//! │ 4 bytes u32BE│ Length bytes         │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! There is no type tag at this layer; payload interpretation belongs to the
//! consumer (see [`ControlMessage`](super::ControlMessage)).
//!
//! # Example
//!
//! ```
//! use danmaku_relay::control::{encode_control_frame, ControlFrameBuffer};
//!
//! let wire = encode_control_frame(b"hello");
//! let mut buffer = ControlFrameBuffer::new();
//!
//! assert!(buffer.push(&wire[..3]).unwrap().is_empty());
//! let frames = buffer.push(&wire[3..]).unwrap();
//! assert_eq!(&frames[0][..], b"hello");
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RelayError, Result};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum control payload (16 MB).
pub const DEFAULT_MAX_CONTROL_FRAME: usize = 16 * 1024 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Need the 4-byte length prefix.
    WaitingForLength,
    /// Prefix consumed, need this many payload bytes.
    WaitingForPayload { remaining: usize },
}

/// Accumulates control-link bytes and extracts complete payloads.
#[derive(Debug)]
pub struct ControlFrameBuffer {
    buffer: BytesMut,
    state: State,
    max_frame_size: usize,
}

impl ControlFrameBuffer {
    /// Create a frame buffer with default settings (64KB initial, 16MB max).
    pub fn new() -> Self {
        Self::with_capacity_and_max(64 * 1024, DEFAULT_MAX_CONTROL_FRAME)
    }

    /// Create a frame buffer with custom initial capacity and max payload.
    pub fn with_capacity_and_max(capacity: usize, max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete payloads.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::FrameTooLarge`] if a length prefix exceeds the
    /// configured maximum. The link should be dropped.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    if self.buffer.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }

                    let length = self.buffer.get_u32() as usize;
                    if length > self.max_frame_size {
                        return Err(RelayError::FrameTooLarge {
                            length,
                            max: self.max_frame_size,
                        });
                    }

                    self.state = State::WaitingForPayload { remaining: length };
                }

                State::WaitingForPayload { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }
}

impl Default for ControlFrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode `payload` as one control frame (prefix + payload, contiguous).
pub fn encode_control_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode just the length prefix for a payload of `len` bytes.
#[inline]
pub fn encode_length_prefix(len: usize) -> [u8; LENGTH_PREFIX_SIZE] {
    (len as u32).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = ControlFrameBuffer::new();
        let frames = buffer.push(&encode_control_frame(b"hello")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_prefix_is_big_endian() {
        let wire = encode_control_frame(&[0xAB; 0x0102]);
        assert_eq!(&wire[..4], &[0x00, 0x00, 0x01, 0x02]);
        assert_eq!(encode_length_prefix(0x0102), [0x00, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut combined = Vec::new();
        for payload in [&b"first"[..], b"second", b"third"] {
            combined.extend_from_slice(&encode_control_frame(payload));
        }

        let mut buffer = ControlFrameBuffer::new();
        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..], b"first");
        assert_eq!(&frames[1][..], b"second");
        assert_eq!(&frames[2][..], b"third");
    }

    #[test]
    fn test_fragmented_prefix_and_payload() {
        let wire = encode_control_frame(b"fragmented payload");
        let mut buffer = ControlFrameBuffer::new();

        assert!(buffer.push(&wire[..2]).unwrap().is_empty());
        assert!(buffer.push(&wire[2..7]).unwrap().is_empty());
        let frames = buffer.push(&wire[7..]).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"fragmented payload");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut wire = encode_control_frame(b"a").to_vec();
        wire.extend_from_slice(&encode_control_frame(b"bc"));

        let mut buffer = ControlFrameBuffer::new();
        let mut frames = Vec::new();
        for byte in &wire {
            frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"a");
        assert_eq!(&frames[1][..], b"bc");
    }

    #[test]
    fn test_empty_payload() {
        let mut buffer = ControlFrameBuffer::new();
        let frames = buffer.push(&encode_control_frame(b"")).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_max_frame_validation() {
        let mut buffer = ControlFrameBuffer::with_capacity_and_max(64, 100);
        let err = buffer.push(&encode_length_prefix(1000)).unwrap_err();
        assert!(matches!(
            err,
            RelayError::FrameTooLarge {
                length: 1000,
                max: 100
            }
        ));
    }

    #[test]
    fn test_clear_resets_state() {
        let wire = encode_control_frame(b"test");
        let mut buffer = ControlFrameBuffer::new();
        buffer.push(&wire[..6]).unwrap();
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());

        let frames = buffer.push(&encode_control_frame(b"fresh")).unwrap();
        assert_eq!(&frames[0][..], b"fresh");
    }
}

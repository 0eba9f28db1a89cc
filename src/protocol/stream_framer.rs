//! Stream framer for the chat-service byte stream.
//!
//! Reassembles packets from arbitrarily chunked reads into one fixed-size
//! buffer. The only state carried between calls is the number of bytes of
//! an incomplete trailing packet, which is always moved to offset 0:
//!
//! ```text
//!  before:  [ pkt A | pkt B | pkt C (partial) ........ free ........ ]
//!            ^0                ^offset          ^occupied             ^capacity
//!  after:   [ pkt C (partial) ............... free ................. ]
//!            ^0               ^next_write_offset == carry
//! ```
//!
//! Offset 0 therefore always starts a header boundary.
//!
//! # Example
//!
//! ```
//! use danmaku_relay::protocol::{build_heartbeat, StreamBuffer};
//!
//! let packet = build_heartbeat();
//! let mut buffer = StreamBuffer::with_capacity(1024);
//! let mut seen = 0;
//!
//! // First half of the packet: nothing to dispatch yet.
//! let half = packet.len() / 2;
//! buffer.write_slot()[..half].copy_from_slice(&packet[..half]);
//! buffer.advance(half, &mut |_p: danmaku_relay::protocol::PacketView<'_>| seen += 1).unwrap();
//! assert_eq!(buffer.carry(), half);
//!
//! // Second half completes it.
//! let rest = packet.len() - half;
//! buffer.write_slot()[..rest].copy_from_slice(&packet[half..]);
//! buffer.advance(rest, &mut |_p: danmaku_relay::protocol::PacketView<'_>| seen += 1).unwrap();
//! assert_eq!(seen, 1);
//! assert_eq!(buffer.carry(), 0);
//! ```

use super::packet::PacketView;
use super::wire_format::{PacketHeader, HEADER_SIZE};
use crate::error::{RelayError, Result};

/// Receiver of complete packets.
///
/// The view borrows the stream buffer and is only valid for the duration of
/// the call.
pub trait PacketSink {
    /// Handle one complete packet.
    fn on_packet(&mut self, packet: PacketView<'_>);
}

impl<F> PacketSink for F
where
    F: FnMut(PacketView<'_>),
{
    fn on_packet(&mut self, packet: PacketView<'_>) {
        self(packet)
    }
}

/// Outcome of one [`advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// Where the next network read should append.
    pub next_write_offset: usize,
    /// Bytes of an incomplete packet now held at offset 0.
    pub carry: usize,
    /// Packets dispatched during this call.
    pub dispatched: usize,
}

/// Run the framer over `buffer[0..carry_in + transferred]`.
///
/// `carry_in` bytes were kept from the previous call and `transferred` new
/// bytes were appended right after them. Every complete packet is handed to
/// `sink` in stream order; leftover bytes are moved to the front.
///
/// # Errors
///
/// - [`RelayError::BufferExhausted`] if `carry_in + transferred` exceeds
///   `buffer.len()`.
/// - [`RelayError::MalformedPacket`] on a header invariant violation.
///   Processing stops immediately; packets before the bad header have
///   already been dispatched.
/// - [`RelayError::PacketTooLarge`] if an incomplete packet declares a
///   length the buffer can never hold.
pub fn advance<S>(
    buffer: &mut [u8],
    transferred: usize,
    carry_in: usize,
    sink: &mut S,
) -> Result<Advance>
where
    S: PacketSink + ?Sized,
{
    let capacity = buffer.len();
    let occupied = match carry_in.checked_add(transferred) {
        Some(n) if n <= capacity => n,
        _ => {
            return Err(RelayError::BufferExhausted {
                needed: carry_in.saturating_add(transferred),
                capacity,
            })
        }
    };

    let mut offset = 0;
    let mut dispatched = 0;

    while let Some(header) = PacketHeader::decode(&buffer[offset..occupied]) {
        header.validate()?;

        let length = header.length as usize;
        if occupied - offset < length {
            if length > capacity {
                return Err(RelayError::PacketTooLarge { length, capacity });
            }
            break;
        }

        sink.on_packet(PacketView {
            header,
            payload: &buffer[offset + HEADER_SIZE..offset + length],
        });
        offset += length;
        dispatched += 1;
    }

    let carry = occupied - offset;
    if offset > 0 && carry > 0 {
        buffer.copy_within(offset..occupied, 0);
    }

    Ok(Advance {
        next_write_offset: carry,
        carry,
        dispatched,
    })
}

/// Fixed-capacity buffer that owns the carry state for [`advance`].
///
/// Typical read loop:
///
/// ```ignore
/// let n = reader.read(buffer.write_slot()).await?;
/// buffer.advance(n, &mut sink)?;
/// ```
#[derive(Debug)]
pub struct StreamBuffer {
    buf: Box<[u8]>,
    carry: usize,
}

impl StreamBuffer {
    /// Allocate a buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            carry: 0,
        }
    }

    /// Region the next read should fill.
    #[inline]
    pub fn write_slot(&mut self) -> &mut [u8] {
        &mut self.buf[self.carry..]
    }

    /// Account for `transferred` bytes written into [`write_slot`] and
    /// dispatch every complete packet.
    ///
    /// Returns the number of packets dispatched. On error the carry is
    /// discarded; the connection feeding this buffer should be dropped.
    ///
    /// [`write_slot`]: StreamBuffer::write_slot
    pub fn advance<S>(&mut self, transferred: usize, sink: &mut S) -> Result<usize>
    where
        S: PacketSink + ?Sized,
    {
        match advance(&mut self.buf, transferred, self.carry, sink) {
            Ok(outcome) => {
                self.carry = outcome.carry;
                Ok(outcome.dispatched)
            }
            Err(e) => {
                self.carry = 0;
                Err(e)
            }
        }
    }

    /// Bytes of an incomplete packet held at the front.
    #[inline]
    pub fn carry(&self) -> usize {
        self.carry
    }

    /// Fixed capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Drop any carried bytes.
    pub fn clear(&mut self) {
        self.carry = 0;
    }
}

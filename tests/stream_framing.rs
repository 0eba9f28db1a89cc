//! Property tests for the stream framer.
//!
//! However a well-formed stream is cut into reads, the framer must
//! dispatch exactly the packets it was built from, with identical
//! boundaries.

use bytes::Bytes;
use proptest::prelude::*;

use danmaku_relay::protocol::{
    advance, OpCode, Packet, PacketView, ProtocolVersion, StreamBuffer, HEADER_SIZE,
};
use danmaku_relay::RelayError;

const CAPACITY: usize = 512;

fn op_code() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Heartbeat),
        Just(OpCode::HeartbeatResp),
        Just(OpCode::JsonMessage),
        Just(OpCode::JoinRoom),
        Just(OpCode::JoinRoomResp),
        (9u32..64).prop_map(OpCode::from),
    ]
}

fn version() -> impl Strategy<Value = ProtocolVersion> {
    prop_oneof![
        Just(ProtocolVersion::Json),
        Just(ProtocolVersion::Popularity),
        Just(ProtocolVersion::ZlibCompressed),
    ]
}

fn packet() -> impl Strategy<Value = Packet> {
    (op_code(), version(), prop::collection::vec(any::<u8>(), 0..200))
        .prop_map(|(op, ver, body)| Packet::new(op, ver, Bytes::from(body)).unwrap())
}

/// A packet list plus the cut points splitting its encoding into reads.
fn chunked_stream() -> impl Strategy<Value = (Vec<Packet>, Vec<usize>)> {
    prop::collection::vec(packet(), 0..24).prop_flat_map(|packets| {
        let total: usize = packets.iter().map(|p| p.to_bytes().len()).sum();
        let cuts = prop::collection::vec(0..=total, 0..32);
        (Just(packets), cuts)
    })
}

fn feed(stream: &[u8], mut cuts: Vec<usize>) -> Vec<Packet> {
    cuts.push(0);
    cuts.push(stream.len());
    cuts.sort_unstable();
    cuts.dedup();

    let mut buffer = StreamBuffer::with_capacity(CAPACITY);
    let mut out = Vec::new();

    for window in cuts.windows(2) {
        let mut piece = &stream[window[0]..window[1]];
        // A read never returns more than the free slot holds.
        while !piece.is_empty() {
            let slot = buffer.write_slot();
            let n = slot.len().min(piece.len());
            slot[..n].copy_from_slice(&piece[..n]);
            buffer
                .advance(n, &mut |p: PacketView<'_>| out.push(p.to_packet()))
                .unwrap();
            piece = &piece[n..];
        }
    }

    assert_eq!(buffer.carry(), 0);
    out
}

proptest! {
    #[test]
    fn prop_any_chunking_yields_same_packets((packets, cuts) in chunked_stream()) {
        let stream: Vec<u8> = packets.iter().flat_map(|p| p.to_bytes().to_vec()).collect();

        let dispatched = feed(&stream, cuts);

        prop_assert_eq!(dispatched, packets);
    }

    #[test]
    fn prop_partial_header_is_carried(len in 1usize..HEADER_SIZE) {
        let stream = Packet::new(OpCode::JsonMessage, ProtocolVersion::Json, Bytes::from_static(b"{}"))
            .unwrap()
            .to_bytes();
        let mut buffer = vec![0u8; CAPACITY];
        buffer[..len].copy_from_slice(&stream[..len]);

        let mut dispatched = 0;
        let outcome = advance(&mut buffer, len, 0, &mut |_p: PacketView<'_>| dispatched += 1).unwrap();

        prop_assert_eq!(dispatched, 0);
        prop_assert_eq!(outcome.carry, len);
        prop_assert_eq!(outcome.next_write_offset, len);
    }

    #[test]
    fn prop_partial_body_is_carried(body in prop::collection::vec(any::<u8>(), 1..100), cut in any::<prop::sample::Index>()) {
        let stream = Packet::new(OpCode::JsonMessage, ProtocolVersion::Json, Bytes::from(body))
            .unwrap()
            .to_bytes();
        let len = HEADER_SIZE + cut.index(stream.len() - HEADER_SIZE);
        let mut buffer = vec![0u8; CAPACITY];
        buffer[..len].copy_from_slice(&stream[..len]);

        let mut dispatched = 0;
        let outcome = advance(&mut buffer, len, 0, &mut |_p: PacketView<'_>| dispatched += 1).unwrap();

        prop_assert_eq!(dispatched, 0);
        prop_assert_eq!(outcome.carry, len);
    }

    #[test]
    fn prop_bad_header_length_rejected(header_length in any::<u16>().prop_filter("valid", |v| *v != 16)) {
        let mut stream = Packet::new(OpCode::Heartbeat, ProtocolVersion::Popularity, Bytes::new())
            .unwrap()
            .to_bytes()
            .to_vec();
        stream[4..6].copy_from_slice(&header_length.to_be_bytes());
        let mut buffer = vec![0u8; CAPACITY];
        buffer[..stream.len()].copy_from_slice(&stream);

        let mut dispatched = 0;
        let err = advance(&mut buffer, stream.len(), 0, &mut |_p: PacketView<'_>| dispatched += 1)
            .unwrap_err();

        prop_assert!(matches!(err, RelayError::MalformedPacket { .. }), "expected MalformedPacket, got {:?}", err);
        prop_assert_eq!(dispatched, 0);
    }
}

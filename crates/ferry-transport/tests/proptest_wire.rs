//! Property-based tests for the Ferry frame codec.
//!
//! Roundtrip over the full header value range, stream-id padding, and the
//! two rejection rules (short buffer, unknown kind).

use bytes::{Bytes, BytesMut};
use ferry_transport::wire::*;
use proptest::prelude::*;

// ─── Strategies ─────────────────────────────────────────────────────────────

fn kind() -> impl Strategy<Value = FrameKind> {
    prop_oneof![Just(FrameKind::Ack), Just(FrameKind::Data)]
}

/// Stream id labels of any length up to the wire width.
fn short_id() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(1u8..=255, 0..=STREAM_ID_LEN)
}

fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..MAX_DATAGRAM_SIZE - HEADER_SIZE)
}

// ─── Roundtrip ──────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn frame_roundtrip(
        seq_number in any::<u32>(),
        seq_total in any::<u32>(),
        kind in kind(),
        id in short_id(),
        body in payload(),
    ) {
        let frame = Frame {
            seq_number,
            seq_total,
            kind,
            stream_id: StreamId::from_slice(&id),
            payload: Bytes::from(body.clone()),
        };
        let wire = frame.encode().freeze();
        prop_assert_eq!(wire.len(), HEADER_SIZE + body.len());

        let decoded = Frame::decode(wire).unwrap();
        prop_assert_eq!(decoded.seq_number, seq_number);
        prop_assert_eq!(decoded.seq_total, seq_total);
        prop_assert_eq!(decoded.kind, kind);
        prop_assert_eq!(&decoded.payload[..], &body[..]);
        prop_assert_eq!(&decoded.stream_id.as_bytes()[..id.len()], &id[..]);
        prop_assert!(decoded.stream_id.as_bytes()[id.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn terminal_ack_roundtrip(seq in any::<u32>(), received in any::<u32>(), crc in any::<u32>()) {
        let ack = Frame::terminal_ack(StreamId::from_label("file001"), seq, received, crc);
        let decoded = Frame::decode(ack.encode().freeze()).unwrap();
        prop_assert_eq!(decoded.checksum(), Some(crc));
        prop_assert_eq!(decoded, ack);
    }

    #[test]
    fn encode_into_appends(a in any::<u32>(), b in any::<u32>()) {
        let first = Frame::ack(StreamId::from_label("x"), a, 1);
        let second = Frame::ack(StreamId::from_label("y"), b, 2);
        let mut buf = BytesMut::new();
        first.encode_into(&mut buf);
        second.encode_into(&mut buf);
        let mut all = buf.freeze();
        let tail = all.split_off(HEADER_SIZE);
        prop_assert_eq!(Frame::decode(all).unwrap(), first);
        prop_assert_eq!(Frame::decode(tail).unwrap(), second);
    }
}

// ─── Rejection ──────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn short_buffers_never_decode(raw in prop::collection::vec(any::<u8>(), 0..HEADER_SIZE)) {
        let len = raw.len();
        prop_assert_eq!(Frame::decode(Bytes::from(raw)), Err(FrameError::Truncated { len }));
    }

    #[test]
    fn unknown_kind_never_decodes(
        mut raw in prop::collection::vec(any::<u8>(), HEADER_SIZE..64),
        kind in 2u8..=255,
    ) {
        raw[8] = kind;
        prop_assert_eq!(Frame::decode(Bytes::from(raw)), Err(FrameError::UnknownKind(kind)));
    }

    #[test]
    fn arbitrary_bytes_never_panic(raw in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Frame::decode(Bytes::from(raw));
    }
}

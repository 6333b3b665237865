//! # Ferry Wire Format
//!
//! Fixed 17-byte header followed by an optional body. Every multi-byte field
//! is **little-endian**; this matches the layout produced by the existing
//! peers, which copied host-order integers straight onto the wire on x86.
//!
//! ```text
//!  offset  size  field
//!  0       4     seq_number   (u32 LE)
//!  4       4     seq_total    (u32 LE)
//!  8       1     kind         (0 = Ack, 1 = Data)
//!  9       8     stream_id    (zero-padded / truncated)
//!  17      var   payload      (Data frames)
//!  17      4     checksum     (terminal Ack only, u32 LE)
//! ```
//!
//! On an Ack frame `seq_total` carries the number of distinct segments the
//! receiver currently holds for the stream, not the sender's declared total.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Length of a stream identifier on the wire.
pub const STREAM_ID_LEN: usize = 8;

/// Fixed header size: 4 (seq_number) + 4 (seq_total) + 1 (kind) + 8 (stream id).
pub const HEADER_SIZE: usize = 4 + 4 + 1 + STREAM_ID_LEN;

/// Size of the CRC32C trailer on a terminal acknowledgment.
pub const CHECKSUM_SIZE: usize = 4;

/// Largest datagram either side reads (Ethernet MTU minus IPv4 + UDP headers).
pub const MAX_DATAGRAM_SIZE: usize = 1472;

// ─── Stream Id ───────────────────────────────────────────────────────────────

/// Eight-byte identifier of a logical stream, independent of the peer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId([u8; STREAM_ID_LEN]);

impl StreamId {
    pub const fn new(bytes: [u8; STREAM_ID_LEN]) -> Self {
        StreamId(bytes)
    }

    /// Build an id from arbitrary bytes: shorter input is zero-padded,
    /// longer input is truncated to eight bytes.
    pub fn from_slice(raw: &[u8]) -> Self {
        let mut bytes = [0u8; STREAM_ID_LEN];
        let n = raw.len().min(STREAM_ID_LEN);
        bytes[..n].copy_from_slice(&raw[..n]);
        StreamId(bytes)
    }

    /// Build an id from a human-readable label (see [`StreamId::from_slice`]).
    pub fn from_label(label: &str) -> Self {
        Self::from_slice(label.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; STREAM_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(STREAM_ID_LEN);
        f.write_str(&String::from_utf8_lossy(&self.0[..end]))
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({:?})", self.to_string())
    }
}

// ─── Frame Kind ──────────────────────────────────────────────────────────────

/// Frame discriminant carried in byte 8 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Ack = 0,
    Data = 1,
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FrameKind::Ack),
            1 => Some(FrameKind::Data),
            _ => None,
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Reasons a datagram cannot be decoded into a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("datagram too short: {len} bytes, header needs 17")]
    Truncated { len: usize },
    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),
}

// ─── Frame ───────────────────────────────────────────────────────────────────

/// One decoded wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq_number: u32,
    /// Declared segment count on Data frames; distinct-received count on Acks.
    pub seq_total: u32,
    pub kind: FrameKind,
    pub stream_id: StreamId,
    /// Segment bytes on Data frames; empty or a 4-byte checksum on Acks.
    pub payload: Bytes,
}

impl Frame {
    /// A Data frame carrying segment `seq_number` of `seq_total`.
    pub fn data(stream_id: StreamId, seq_number: u32, seq_total: u32, payload: Bytes) -> Self {
        Frame {
            seq_number,
            seq_total,
            kind: FrameKind::Data,
            stream_id,
            payload,
        }
    }

    /// A non-terminal acknowledgment of `seq_number`.
    pub fn ack(stream_id: StreamId, seq_number: u32, received: u32) -> Self {
        Frame {
            seq_number,
            seq_total: received,
            kind: FrameKind::Ack,
            stream_id,
            payload: Bytes::new(),
        }
    }

    /// The acknowledgment that completes a stream and carries its checksum.
    pub fn terminal_ack(stream_id: StreamId, seq_number: u32, received: u32, checksum: u32) -> Self {
        Frame {
            payload: Bytes::copy_from_slice(&checksum.to_le_bytes()),
            ..Frame::ack(stream_id, seq_number, received)
        }
    }

    /// Checksum trailer, present only on a terminal Ack.
    pub fn checksum(&self) -> Option<u32> {
        if self.kind != FrameKind::Ack || self.payload.len() != CHECKSUM_SIZE {
            return None;
        }
        let mut trailer = &self.payload[..];
        Some(trailer.get_u32_le())
    }

    pub fn is_terminal_ack(&self) -> bool {
        self.checksum().is_some()
    }

    /// Total encoded size of this frame.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u32_le(self.seq_number);
        buf.put_u32_le(self.seq_total);
        buf.put_u8(self.kind as u8);
        buf.put_slice(self.stream_id.as_bytes());
        buf.put_slice(&self.payload);
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decode a whole datagram. Everything after the header becomes the
    /// payload; payload length is not validated.
    pub fn decode(mut buf: Bytes) -> Result<Self, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Truncated { len: buf.len() });
        }

        let seq_number = buf.get_u32_le();
        let seq_total = buf.get_u32_le();
        let kind_byte = buf.get_u8();
        let kind = FrameKind::from_byte(kind_byte).ok_or(FrameError::UnknownKind(kind_byte))?;
        let stream_id = StreamId::from_slice(&buf.split_to(STREAM_ID_LEN));

        Ok(Frame {
            seq_number,
            seq_total,
            kind,
            stream_id,
            payload: buf,
        })
    }
}

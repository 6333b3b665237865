//! # Stream Segmenter
//!
//! Splits a logical stream into numbered Data frames and keeps the reference
//! checksum the receiver is expected to report back.
//!
//! Synthetic streams (the client's test payloads) get random segment sizes
//! within `[min_segment_size, max_segment_size]` and random filler bytes.
//! Stream ids come from a shared [`StreamIdAllocator`] so several segmenters,
//! possibly on different threads, never reuse an id.

use bytes::Bytes;
use quanta::Instant;
use rand::rngs::StdRng;
use rand::{RngExt as _, SeedableRng};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::checksum::StreamChecksum;
use crate::wire::{Frame, StreamId, HEADER_SIZE};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Bounds for synthetic segment sizes (inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmenterConfig {
    pub min_segment_size: usize,
    pub max_segment_size: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        SegmenterConfig {
            min_segment_size: 10,
            max_segment_size: 786,
        }
    }
}

// ─── Stream Id Allocation ───────────────────────────────────────────────────

/// Monotonic source of human-readable stream ids (`file001`, `file002`, ...).
///
/// Share one allocator behind an `Arc` wherever ids must stay distinct.
#[derive(Debug)]
pub struct StreamIdAllocator {
    next: AtomicU32,
}

impl StreamIdAllocator {
    pub fn new() -> Self {
        StreamIdAllocator {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate the next id. Counters past 9999 lose trailing digits to the
    /// eight-byte limit.
    pub fn allocate(&self) -> StreamId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        StreamId::from_label(&format!("file{n:03}"))
    }
}

impl Default for StreamIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Segment ────────────────────────────────────────────────────────────────

/// Transmission state of a segment, derived from its bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Unsent,
    InFlight,
    Acknowledged,
}

/// One outbound Data frame plus retransmission bookkeeping.
#[derive(Debug, Clone)]
pub struct Segment {
    pub stream_id: StreamId,
    /// Segment index, equal to the frame's seq_number.
    pub index: u32,
    /// Encoded Data frame, sent verbatim on every (re)transmission.
    pub wire: Bytes,
    pub acknowledged: bool,
    /// `None` until the first send.
    pub last_sent_at: Option<Instant>,
}

impl Segment {
    pub fn state(&self) -> SegmentState {
        match (self.acknowledged, self.last_sent_at) {
            (true, _) => SegmentState::Acknowledged,
            (false, None) => SegmentState::Unsent,
            (false, Some(_)) => SegmentState::InFlight,
        }
    }

    /// Whether the segment should go out now: unacknowledged and either never
    /// sent or last sent more than `interval` ago.
    pub fn is_due(&self, now: Instant, interval: Duration) -> bool {
        if self.acknowledged {
            return false;
        }
        match self.last_sent_at {
            None => true,
            Some(sent) => now.saturating_duration_since(sent) > interval,
        }
    }

    /// Segment payload (the Data frame body). Empty if `wire` is shorter
    /// than a header.
    pub fn payload(&self) -> &[u8] {
        self.wire.get(HEADER_SIZE..).unwrap_or(&[])
    }
}

// ─── Generated Stream ───────────────────────────────────────────────────────

/// A fully segmented stream and its reference checksum.
#[derive(Debug, Clone)]
pub struct SegmentedStream {
    pub stream_id: StreamId,
    /// CRC32C over all payloads in ascending index order.
    pub checksum: u32,
    pub segments: Vec<Segment>,
}

impl SegmentedStream {
    /// Segment pre-split payloads, one Data frame per element, in order.
    pub fn from_payloads(stream_id: StreamId, payloads: Vec<Bytes>) -> Self {
        let seq_total = payloads.len() as u32;
        let mut crc = StreamChecksum::new();
        let segments = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                crc.update(&payload);
                let index = i as u32;
                Segment {
                    stream_id,
                    index,
                    wire: Frame::data(stream_id, index, seq_total, payload).encode().freeze(),
                    acknowledged: false,
                    last_sent_at: None,
                }
            })
            .collect();

        SegmentedStream {
            stream_id,
            checksum: crc.value(),
            segments,
        }
    }

    pub fn seq_total(&self) -> u32 {
        self.segments.len() as u32
    }
}

// ─── Segmenter ──────────────────────────────────────────────────────────────

/// Generator of synthetic test streams.
pub struct Segmenter {
    config: SegmenterConfig,
    ids: Arc<StreamIdAllocator>,
    rng: StdRng,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig, ids: Arc<StreamIdAllocator>) -> Self {
        Self::with_seed(config, ids, rand::random())
    }

    /// Deterministic sizes and filler for a given seed.
    pub fn with_seed(config: SegmenterConfig, ids: Arc<StreamIdAllocator>, seed: u64) -> Self {
        let config = SegmenterConfig {
            min_segment_size: config.min_segment_size,
            max_segment_size: config.max_segment_size.max(config.min_segment_size),
        };
        Segmenter {
            config,
            ids,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate a stream of `segment_count` random segments under a fresh id.
    pub fn generate(&mut self, segment_count: u32) -> SegmentedStream {
        let stream_id = self.ids.allocate();
        self.generate_with_id(stream_id, segment_count)
    }

    /// Generate a stream under a caller-chosen id.
    pub fn generate_with_id(&mut self, stream_id: StreamId, segment_count: u32) -> SegmentedStream {
        let payloads = (0..segment_count)
            .map(|_| self.random_payload())
            .collect();
        let stream = SegmentedStream::from_payloads(stream_id, payloads);
        tracing::debug!(
            stream = %stream.stream_id,
            segments = segment_count,
            checksum = stream.checksum,
            "stream generated"
        );
        stream
    }

    fn random_payload(&mut self) -> Bytes {
        let len = self
            .rng
            .random_range(self.config.min_segment_size..=self.config.max_segment_size);
        let rng = &mut self.rng;
        let data: Vec<u8> = (0..len).map(|_| rng.random_range(0..255u8)).collect();
        Bytes::from(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::fold_segments;
    use crate::wire::FrameKind;

    fn segmenter(seed: u64) -> Segmenter {
        Segmenter::with_seed(
            SegmenterConfig::default(),
            Arc::new(StreamIdAllocator::new()),
            seed,
        )
    }

    #[test]
    fn allocator_ids_are_padded_and_increasing() {
        let ids = StreamIdAllocator::new();
        assert_eq!(ids.allocate().as_bytes(), b"file001\0");
        assert_eq!(ids.allocate().as_bytes(), b"file002\0");
    }

    #[test]
    fn allocator_shared_across_segmenters() {
        let ids = Arc::new(StreamIdAllocator::new());
        let mut a = Segmenter::with_seed(SegmenterConfig::default(), ids.clone(), 1);
        let mut b = Segmenter::with_seed(SegmenterConfig::default(), ids, 2);
        let s1 = a.generate(1);
        let s2 = b.generate(1);
        assert_ne!(s1.stream_id, s2.stream_id);
    }

    #[test]
    fn generate_numbers_segments_and_declares_total() {
        let stream = segmenter(7).generate(20);
        assert_eq!(stream.segments.len(), 20);
        for (i, seg) in stream.segments.iter().enumerate() {
            assert_eq!(seg.index, i as u32);
            let frame = Frame::decode(seg.wire.clone()).unwrap();
            assert_eq!(frame.kind, FrameKind::Data);
            assert_eq!(frame.seq_number, i as u32);
            assert_eq!(frame.seq_total, 20);
            assert_eq!(frame.stream_id, stream.stream_id);
            assert_eq!(seg.state(), SegmentState::Unsent);
        }
    }

    #[test]
    fn segment_sizes_respect_bounds() {
        let stream = segmenter(11).generate(200);
        for seg in &stream.segments {
            let len = seg.payload().len();
            assert!((10..=786).contains(&len), "segment size {len} out of range");
            assert!(seg.payload().iter().all(|&b| b < 255));
        }
    }

    #[test]
    fn reference_checksum_folds_in_index_order() {
        let stream = segmenter(3).generate(8);
        let expected = fold_segments(stream.segments.iter().map(|s| s.payload()));
        assert_eq!(stream.checksum, expected);
    }

    #[test]
    fn same_seed_same_stream() {
        let a = segmenter(99).generate(5);
        let b = segmenter(99).generate(5);
        assert_eq!(a.checksum, b.checksum);
    }

    #[test]
    fn is_due_follows_retransmit_interval() {
        let stream = segmenter(1).generate(1);
        let mut seg = stream.segments[0].clone();
        let t0 = Instant::now();
        let interval = Duration::from_secs(3);
        assert!(seg.is_due(t0, interval));

        seg.last_sent_at = Some(t0);
        assert_eq!(seg.state(), SegmentState::InFlight);
        assert!(!seg.is_due(t0 + Duration::from_secs(3), interval));
        assert!(seg.is_due(t0 + Duration::from_millis(3001), interval));

        seg.acknowledged = true;
        assert_eq!(seg.state(), SegmentState::Acknowledged);
        assert!(!seg.is_due(t0 + Duration::from_secs(60), interval));
    }

    #[test]
    fn payload_of_short_wire_is_empty() {
        let seg = Segment {
            stream_id: StreamId::from_label("short"),
            index: 0,
            wire: Bytes::from_static(b"abc"),
            acknowledged: false,
            last_sent_at: None,
        };
        assert!(seg.payload().is_empty());

        let header_only = Segment {
            wire: Frame::data(seg.stream_id, 0, 1, Bytes::new()).encode().freeze(),
            ..seg
        };
        assert!(header_only.payload().is_empty());
    }
}

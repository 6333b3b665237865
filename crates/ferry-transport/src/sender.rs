//! # Reliable Sender State Machine
//!
//! Pure logic, no I/O. Holds every segment of a run (possibly several
//! streams interleaved), decides which segments are due for (re)transmission,
//! and matches inbound Ack frames back to segments.
//!
//! ```text
//!   Unsent ──send──▶ InFlight ──(no ack within interval)──▶ InFlight (resend)
//!      │                 │
//!      └──────ack────────┴──────────────▶ Acknowledged
//! ```
//!
//! The driver (socket polling, threading) lives in `ferry-node`. It calls
//! [`ReliableSender::transmit_due`] and [`ReliableSender::handle_datagram`]
//! in a loop until [`ReliableSender::is_complete`] holds.
//!
//! Terminal acks carry the receiver's checksum. It is compared with the
//! local reference for diagnostics only; a mismatch does not stop the run.
//!
//! The receiver drops a stream's state as soon as it emits the terminal ack.
//! If that ack is lost, the resent last segment opens a fresh one-segment
//! stream on the receiver that never completes, and the checksum for the
//! original stream is never confirmed.

use bytes::Bytes;
use quanta::Instant;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::time::Duration;

use crate::segment::{Segment, SegmentedStream};
use crate::stats::SenderStats;
use crate::wire::{Frame, FrameError, FrameKind, StreamId};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Reliable sender parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// A segment is resent once this much time has passed since its last send.
    pub retransmit_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            retransmit_interval: Duration::from_secs(3),
        }
    }
}

// ─── Checksum Reports ───────────────────────────────────────────────────────

/// Comparison of the receiver's checksum against the local reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumVerdict {
    Matched,
    Mismatched { expected: u32, reported: u32 },
    /// No terminal ack has been received for the stream.
    Unconfirmed,
}

/// Per-stream checksum bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub stream_id: StreamId,
    pub segments: u32,
    pub expected_checksum: u32,
    pub reported_checksum: Option<u32>,
}

impl StreamReport {
    pub fn verdict(&self) -> ChecksumVerdict {
        match self.reported_checksum {
            None => ChecksumVerdict::Unconfirmed,
            Some(r) if r == self.expected_checksum => ChecksumVerdict::Matched,
            Some(r) => ChecksumVerdict::Mismatched {
                expected: self.expected_checksum,
                reported: r,
            },
        }
    }
}

/// Final outcome of a sender run.
#[derive(Debug, Clone)]
pub struct SenderReport {
    pub complete: bool,
    pub stats: SenderStats,
    pub streams: Vec<StreamReport>,
}

// ─── Ack Outcome ────────────────────────────────────────────────────────────

/// What an inbound datagram did to the sender's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// A segment moved to Acknowledged.
    Acknowledged { stream_id: StreamId, seq_number: u32 },
    /// The ack named a segment that was already acknowledged.
    Duplicate,
    /// The ack named no segment of this run.
    Unmatched,
    /// A well-formed frame that is not an ack.
    NotAnAck,
    Malformed(FrameError),
}

// ─── Sender ─────────────────────────────────────────────────────────────────

/// Reliable sender state machine for one run.
pub struct ReliableSender {
    config: SenderConfig,
    segments: Vec<Segment>,
    /// (stream, seq_number) → position in `segments`.
    lookup: HashMap<(StreamId, u32), usize>,
    streams: Vec<StreamReport>,
    stats: SenderStats,
}

impl ReliableSender {
    /// Build a run over all segments of `streams`, in the order given.
    pub fn new(config: SenderConfig, streams: Vec<SegmentedStream>) -> Self {
        let mut segments = Vec::new();
        let mut reports = Vec::with_capacity(streams.len());
        for stream in streams {
            reports.push(StreamReport {
                stream_id: stream.stream_id,
                segments: stream.seq_total(),
                expected_checksum: stream.checksum,
                reported_checksum: None,
            });
            segments.extend(stream.segments);
        }

        let stats = SenderStats {
            segments_total: segments.len() as u64,
            ..SenderStats::default()
        };

        let mut sender = ReliableSender {
            config,
            segments,
            lookup: HashMap::new(),
            streams: reports,
            stats,
        };
        sender.rebuild_lookup();
        sender
    }

    /// Shuffle transmission order to put reordering pressure on the receiver.
    pub fn shuffle(&mut self) {
        self.shuffle_seeded(rand::random());
    }

    /// Shuffle with a reproducible order.
    pub fn shuffle_seeded(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.segments.shuffle(&mut rng);
        self.rebuild_lookup();
    }

    fn rebuild_lookup(&mut self) {
        self.lookup = self
            .segments
            .iter()
            .enumerate()
            .map(|(pos, seg)| ((seg.stream_id, seg.index), pos))
            .collect();
    }

    /// Offer every due segment to `send`, in list order.
    ///
    /// `send` returns `true` when the datagram was handed to the transport;
    /// only then is the segment stamped as sent. A `false` leaves the segment
    /// due for the next call. Returns the number of segments sent.
    pub fn transmit_due<F>(&mut self, now: Instant, mut send: F) -> usize
    where
        F: FnMut(&Segment) -> bool,
    {
        let interval = self.config.retransmit_interval;
        let mut sent = 0;
        for seg in self.segments.iter_mut() {
            if !seg.is_due(now, interval) || !send(&*seg) {
                continue;
            }
            if seg.last_sent_at.is_some() {
                self.stats.retransmissions += 1;
                tracing::debug!(stream = %seg.stream_id, seq = seg.index, "retransmit");
            }
            seg.last_sent_at = Some(now);
            self.stats.transmissions += 1;
            sent += 1;
        }
        sent
    }

    /// Feed one inbound datagram.
    pub fn handle_datagram(&mut self, raw: Bytes) -> AckOutcome {
        let frame = match Frame::decode(raw) {
            Ok(f) => f,
            Err(e) => {
                self.stats.malformed_frames += 1;
                tracing::debug!(error = %e, "dropping undecodable datagram");
                return AckOutcome::Malformed(e);
            }
        };
        if frame.kind != FrameKind::Ack {
            self.stats.malformed_frames += 1;
            return AckOutcome::NotAnAck;
        }
        self.handle_ack(&frame)
    }

    /// Apply a decoded Ack frame.
    pub fn handle_ack(&mut self, ack: &Frame) -> AckOutcome {
        self.stats.acks_received += 1;
        tracing::debug!(
            stream = %ack.stream_id,
            seq = ack.seq_number,
            received = ack.seq_total,
            "ack"
        );

        if let Some(reported) = ack.checksum() {
            self.record_checksum(ack.stream_id, reported);
        }

        let Some(&pos) = self.lookup.get(&(ack.stream_id, ack.seq_number)) else {
            self.stats.unmatched_acks += 1;
            return AckOutcome::Unmatched;
        };
        let seg = &mut self.segments[pos];
        if seg.acknowledged {
            self.stats.unmatched_acks += 1;
            return AckOutcome::Duplicate;
        }
        seg.acknowledged = true;
        self.stats.segments_acked += 1;
        AckOutcome::Acknowledged {
            stream_id: ack.stream_id,
            seq_number: ack.seq_number,
        }
    }

    fn record_checksum(&mut self, stream_id: StreamId, reported: u32) {
        let Some(report) = self.streams.iter_mut().find(|r| r.stream_id == stream_id) else {
            tracing::debug!(stream = %stream_id, reported, "checksum for unknown stream");
            return;
        };
        report.reported_checksum = Some(reported);
        if reported == report.expected_checksum {
            self.stats.checksum_matches += 1;
            tracing::info!(stream = %stream_id, checksum = reported, "stream checksum verified");
        } else {
            self.stats.checksum_mismatches += 1;
            tracing::warn!(
                stream = %stream_id,
                expected = report.expected_checksum,
                reported,
                "stream checksum mismatch"
            );
        }
    }

    /// True once every segment is acknowledged.
    pub fn is_complete(&self) -> bool {
        self.segments.iter().all(|s| s.acknowledged)
    }

    /// Segments not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.segments.iter().filter(|s| !s.acknowledged).count()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn streams(&self) -> &[StreamReport] {
        &self.streams
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn into_report(self) -> SenderReport {
        SenderReport {
            complete: self.is_complete(),
            stats: self.stats,
            streams: self.streams,
        }
    }
}

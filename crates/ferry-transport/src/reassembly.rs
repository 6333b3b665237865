//! # Per-Peer Reassembler
//!
//! Server-side protocol state for one peer (address, port). Accumulates Data
//! frames per stream id, answers every Data frame with exactly one Ack, and
//! detects stream completion.
//!
//! - Segments are keyed by `seq_number`; a repeated number keeps the first
//!   payload and drops the later one.
//! - A stream completes when its distinct segment count reaches the
//!   `seq_total` carried by the latest Data frame. The reply to that frame is
//!   the terminal Ack: header plus the CRC32C of all payloads in ascending
//!   `seq_number` order. The stream's state is discarded right away, so a
//!   later frame with the same id starts a new stream.
//! - Every datagram, decodable or not, refreshes the session's activity
//!   timestamp. The owning dispatcher reclaims the session once
//!   [`Reassembler::is_idle`] or [`Reassembler::is_expired`] holds.
//!
//! Like the rest of this crate it does no I/O; callers pass `now` in.

use bytes::Bytes;
use quanta::Instant;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::checksum::fold_segments;
use crate::stats::ReassemblerStats;
use crate::wire::{Frame, FrameKind, StreamId};

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassemblyConfig {
    /// A session with no activity for longer than this reports expired.
    pub session_expiry: Duration,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        ReassemblyConfig {
            session_expiry: Duration::from_secs(10),
        }
    }
}

// ─── Stream State ───────────────────────────────────────────────────────────

/// Segments held for one in-progress stream.
#[derive(Debug, Default)]
struct StreamState {
    /// Ordered by seq_number, so folding the checksum is a plain iteration.
    segments: BTreeMap<u32, Bytes>,
    /// Declared total from the most recent Data frame.
    seq_total: u32,
}

impl StreamState {
    fn received(&self) -> u32 {
        self.segments.len() as u32
    }

    fn checksum(&self) -> u32 {
        fold_segments(self.segments.values().map(|b| &b[..]))
    }
}

// ─── Reassembler ────────────────────────────────────────────────────────────

/// Reassembly state for one peer session.
pub struct Reassembler {
    config: ReassemblyConfig,
    streams: HashMap<StreamId, StreamState>,
    last_activity: Instant,
    stats: ReassemblerStats,
}

impl Reassembler {
    /// A fresh session; `now` counts as its first activity.
    pub fn new(config: ReassemblyConfig, now: Instant) -> Self {
        Reassembler {
            config,
            streams: HashMap::new(),
            last_activity: now,
            stats: ReassemblerStats::default(),
        }
    }

    /// Handle one raw datagram from the peer. Returns the encoded Ack to send
    /// back, or `None` when the datagram is dropped.
    pub fn process(&mut self, raw: Bytes, now: Instant) -> Option<Bytes> {
        self.last_activity = now;
        self.stats.frames_received += 1;

        let frame = match Frame::decode(raw) {
            Ok(f) => f,
            Err(e) => {
                self.stats.malformed_frames += 1;
                tracing::debug!(error = %e, "dropping malformed datagram");
                return None;
            }
        };

        match frame.kind {
            FrameKind::Data => Some(self.handle_data(frame)),
            FrameKind::Ack => {
                self.stats.ignored_acks += 1;
                None
            }
        }
    }

    fn handle_data(&mut self, frame: Frame) -> Bytes {
        self.stats.data_frames += 1;
        let stream_id = frame.stream_id;
        let seq_number = frame.seq_number;

        let state = self.streams.entry(stream_id).or_default();
        state.seq_total = frame.seq_total;
        if state.segments.contains_key(&seq_number) {
            self.stats.duplicate_frames += 1;
        } else {
            state.segments.insert(seq_number, frame.payload);
        }

        let received = state.received();
        tracing::debug!(stream = %stream_id, seq = seq_number, received, total = state.seq_total, "data");

        self.stats.acks_sent += 1;
        if received != state.seq_total {
            return Frame::ack(stream_id, seq_number, received).encode().freeze();
        }

        let checksum = state.checksum();
        self.streams.remove(&stream_id);
        self.stats.streams_completed += 1;
        tracing::info!(stream = %stream_id, segments = received, checksum, "stream complete");

        Frame::terminal_ack(stream_id, seq_number, received, checksum)
            .encode()
            .freeze()
    }

    /// No stream is in progress.
    pub fn is_idle(&self) -> bool {
        self.streams.is_empty()
    }

    /// Strictly more than the expiry window has passed since the last datagram.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > self.config.session_expiry
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Distinct segments currently held for `stream_id`.
    pub fn received_count(&self, stream_id: &StreamId) -> Option<u32> {
        self.streams.get(stream_id).map(StreamState::received)
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn stats(&self) -> &ReassemblerStats {
        &self.stats
    }
}

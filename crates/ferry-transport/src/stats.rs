//! # Transport Statistics
//!
//! Sender and receiver counters. Serializable so the node binaries can emit
//! them as JSON at shutdown.

use serde::Serialize;

// ─── Sender Stats ───────────────────────────────────────────────────────────

/// Counters for one Reliable Sender run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    /// Segments across all streams in the run.
    pub segments_total: u64,
    /// Segments that have been acknowledged.
    pub segments_acked: u64,
    /// Datagrams handed to the transport (first sends and resends).
    pub transmissions: u64,
    /// Subset of `transmissions` that were resends.
    pub retransmissions: u64,
    /// Ack frames received.
    pub acks_received: u64,
    /// Acks naming no known segment, or an already-acknowledged one.
    pub unmatched_acks: u64,
    /// Inbound datagrams that failed to decode or were not acks.
    pub malformed_frames: u64,
    /// Terminal acks whose checksum equalled the local reference.
    pub checksum_matches: u64,
    /// Terminal acks whose checksum differed from the local reference.
    pub checksum_mismatches: u64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resend overhead relative to all transmissions.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.transmissions == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.transmissions as f64
        }
    }
}

// ─── Reassembler Stats ──────────────────────────────────────────────────────

/// Counters for one peer's Reassembler, or a sum over many.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReassemblerStats {
    /// Datagrams handed to `process`, decodable or not.
    pub frames_received: u64,
    /// Data frames accepted (including duplicates).
    pub data_frames: u64,
    /// Data frames whose seq_number was already held for the stream.
    pub duplicate_frames: u64,
    /// Datagrams dropped as undecodable.
    pub malformed_frames: u64,
    /// Ack frames received by the server side and dropped.
    pub ignored_acks: u64,
    /// Streams that reached their declared segment count.
    pub streams_completed: u64,
    /// Ack frames produced (terminal ones included).
    pub acks_sent: u64,
}

impl ReassemblerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold another peer's counters into this one.
    pub fn merge(&mut self, other: &ReassemblerStats) {
        self.frames_received += other.frames_received;
        self.data_frames += other.data_frames;
        self.duplicate_frames += other.duplicate_frames;
        self.malformed_frames += other.malformed_frames;
        self.ignored_acks += other.ignored_acks;
        self.streams_completed += other.streams_completed;
        self.acks_sent += other.acks_sent;
    }

    /// Share of data frames that carried new segments.
    pub fn goodput_ratio(&self) -> f64 {
        if self.data_frames == 0 {
            0.0
        } else {
            (self.data_frames - self.duplicate_frames) as f64 / self.data_frames as f64
        }
    }
}

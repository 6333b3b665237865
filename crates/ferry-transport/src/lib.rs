//! # ferry-transport
//!
//! Segmented bulk-transfer protocol over an unordered datagram transport.
//!
//! A client cuts each logical stream into numbered Data frames and resends
//! every unacknowledged frame on a fixed interval. The server reassembles per
//! peer and per stream, acknowledges every frame, and answers the frame that
//! completes a stream with a CRC32C of the whole stream.
//!
//! Everything here is pure protocol logic: no sockets, no threads, and time
//! is always passed in.
//!
//! ## Crate structure
//!
//! - [`wire`] — Frame header codec, stream ids
//! - [`checksum`] — CRC32C folding over ordered segments
//! - [`segment`] — Stream segmenter and stream-id allocator
//! - [`sender`] — Reliable sender state machine
//! - [`reassembly`] — Per-peer reassembler
//! - [`stats`] — Serializable counters

pub mod checksum;
pub mod reassembly;
pub mod segment;
pub mod sender;
pub mod stats;
pub mod wire;

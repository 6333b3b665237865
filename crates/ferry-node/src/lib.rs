//! # ferry-node
//!
//! OS-facing side of Ferry: the UDP transport, the dispatcher worker that
//! owns every peer's reassembly state, the reliable sender driver, the
//! server loop, and TOML configuration.
//!
//! Protocol logic lives in `ferry-transport`; this crate only moves bytes
//! and threads.

pub mod client;
pub mod config;
pub mod net;
pub mod runtime;
pub mod server;

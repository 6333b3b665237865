//! Datagram transport collaborator.
//!
//! The protocol drivers in [`crate::client`] and [`crate::server`] only see
//! the [`Transport`] trait. Failures below it are never fatal to them: a
//! failed receive is "no data", a failed send is "not sendable now".

pub mod socket;

use std::net::SocketAddr;
use std::time::Duration;

pub use socket::{resolve, UdpTransport};

/// Non-blocking datagram endpoint with readiness polling.
pub trait Transport {
    /// Wait up to `timeout` for an inbound datagram.
    fn poll_readable(&self, timeout: Duration) -> bool;

    /// Wait up to `timeout` for send capacity. A zero timeout just checks.
    fn poll_writable(&self, timeout: Duration) -> bool;

    /// Send one datagram. Returns the number of bytes the OS accepted, or
    /// `None` when nothing could be sent.
    fn send_to(&self, buf: &[u8], peer: SocketAddr) -> Option<usize>;

    /// Receive one datagram into `buf`. `None` when no data is available.
    fn recv_from(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)>;
}

//! # Ferry Server Loop
//!
//! Single-threaded socket loop in front of the [`Dispatcher`]. Each turn waits
//! up to `poll_timeout` for a datagram, hands it to the dispatcher, then
//! sends back whatever replies the dispatcher has produced so far.

use anyhow::Result;
use bytes::Bytes;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{FerryConfig, ServerSettings};
use crate::net::{Transport, UdpTransport};
use crate::runtime::{Dispatcher, DispatcherStats};

/// Socket-level counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub datagrams_received: u64,
    pub datagrams_sent: u64,
    /// Replies the transport refused or only partly sent.
    pub send_failures: u64,
}

/// Final numbers after shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct ServerReport {
    pub server: ServerStats,
    pub dispatcher: DispatcherStats,
}

pub struct Server<T: Transport> {
    transport: T,
    dispatcher: Dispatcher,
    settings: ServerSettings,
    buf: Vec<u8>,
    stats: ServerStats,
}

impl Server<UdpTransport> {
    /// Bind `addr` (retrying on address-in-use up to the configured budget)
    /// and start the dispatcher.
    pub fn bind(addr: SocketAddr, config: &FerryConfig) -> Result<Self> {
        let transport = UdpTransport::bind_with_retry(addr, config.server.bind_timeout)?;
        let dispatcher = Dispatcher::new(config.reassembly.clone())?;
        Ok(Self::new(transport, dispatcher, config.server.clone()))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T, dispatcher: Dispatcher, settings: ServerSettings) -> Self {
        Server {
            transport,
            dispatcher,
            buf: vec![0u8; settings.recv_buffer_size],
            settings,
            stats: ServerStats::default(),
        }
    }

    /// One loop turn: read at most one datagram, then flush replies.
    pub fn turn(&mut self) {
        if self.transport.poll_readable(self.settings.poll_timeout) {
            if let Some((n, peer)) = self.transport.recv_from(&mut self.buf) {
                self.stats.datagrams_received += 1;
                self.dispatcher
                    .enqueue_request(peer, Bytes::copy_from_slice(&self.buf[..n]));
            }
        }

        if self.dispatcher.has_responses() {
            self.flush_responses();
        }
    }

    fn flush_responses(&mut self) {
        for response in self.dispatcher.drain_responses() {
            match self.transport.send_to(&response.bytes, response.peer) {
                Some(n) if n == response.bytes.len() => self.stats.datagrams_sent += 1,
                sent => {
                    self.stats.send_failures += 1;
                    tracing::warn!(
                        peer = %response.peer,
                        sent = sent.unwrap_or(0),
                        len = response.bytes.len(),
                        "can't send reply"
                    );
                }
            }
        }
    }

    /// Run turns until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            self.turn();
        }
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Stop the dispatcher and return the final counters.
    pub fn shutdown(mut self) -> ServerReport {
        self.dispatcher.stop();
        ServerReport {
            server: self.stats.clone(),
            dispatcher: self.dispatcher.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_transport::reassembly::ReassemblyConfig;
    use ferry_transport::wire::{Frame, StreamId};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};

    /// Scripted transport: a queue of inbound datagrams and a log of sends.
    #[derive(Default)]
    struct Scripted {
        inbound: RefCell<VecDeque<(Bytes, SocketAddr)>>,
        outbound: RefCell<Vec<(Bytes, SocketAddr)>>,
        refuse_sends: bool,
    }

    impl Transport for Scripted {
        fn poll_readable(&self, _timeout: Duration) -> bool {
            !self.inbound.borrow().is_empty()
        }

        fn poll_writable(&self, _timeout: Duration) -> bool {
            true
        }

        fn send_to(&self, buf: &[u8], peer: SocketAddr) -> Option<usize> {
            if self.refuse_sends {
                return None;
            }
            self.outbound.borrow_mut().push((Bytes::copy_from_slice(buf), peer));
            Some(buf.len())
        }

        fn recv_from(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
            let (msg, peer) = self.inbound.borrow_mut().pop_front()?;
            buf[..msg.len()].copy_from_slice(&msg);
            Some((msg.len(), peer))
        }
    }

    fn server(transport: Scripted) -> Server<Scripted> {
        let dispatcher = Dispatcher::new(ReassemblyConfig::default()).unwrap();
        Server::new(transport, dispatcher, ServerSettings::default())
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], 5555))
    }

    fn run_until<F: Fn(&Server<Scripted>) -> bool>(srv: &mut Server<Scripted>, done: F) {
        let deadline = Instant::now() + Duration::from_secs(1);
        while !done(srv) && Instant::now() < deadline {
            srv.turn();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn replies_go_back_to_sender() {
        let t = Scripted::default();
        for seq in 0..2 {
            let frame = Frame::data(StreamId::from_label("f"), seq, 2, Bytes::from_static(b"x"));
            t.inbound.borrow_mut().push_back((frame.encode().freeze(), peer()));
        }
        let mut srv = server(t);
        run_until(&mut srv, |s| s.stats().datagrams_sent == 2);

        let out = srv.transport.outbound.borrow().clone();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|(_, p)| *p == peer()));
        let last = Frame::decode(out[1].0.clone()).unwrap();
        assert!(last.is_terminal_ack());

        let report = srv.shutdown();
        assert_eq!(report.server.datagrams_received, 2);
        assert_eq!(report.dispatcher.reassembly.streams_completed, 1);
    }

    #[test]
    fn refused_reply_is_counted_not_fatal() {
        let t = Scripted {
            refuse_sends: true,
            ..Default::default()
        };
        let frame = Frame::data(StreamId::from_label("f"), 0, 3, Bytes::new());
        t.inbound.borrow_mut().push_back((frame.encode().freeze(), peer()));
        let mut srv = server(t);
        run_until(&mut srv, |s| s.stats().send_failures == 1);
        assert_eq!(srv.stats().send_failures, 1);
        assert_eq!(srv.stats().datagrams_sent, 0);
    }

    #[test]
    fn run_exits_when_flag_cleared() {
        let mut srv = server(Scripted::default());
        let running = AtomicBool::new(false);
        srv.run(&running);
        assert_eq!(srv.stats(), &ServerStats::default());
    }
}

//! # Reliable Sender Driver
//!
//! Runs a [`ReliableSender`] over a [`Transport`]. Each loop turn:
//!
//! 1. Offers every due segment to the transport, gated by a zero-timeout
//!    write-readiness check.
//! 2. Waits up to `poll_timeout` for one inbound datagram and feeds it to the
//!    state machine.
//!
//! The loop ends once every segment is acknowledged or the stop flag is set.
//! [`SenderHandle`] runs it on a dedicated thread that owns its transport.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use ferry_transport::sender::{ReliableSender, SenderReport};
use ferry_transport::wire::MAX_DATAGRAM_SIZE;
use quanta::Clock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::net::Transport;

/// Drive `sender` to completion (or until `stop` is set) against `dest`.
pub fn run_sender<T: Transport>(
    sender: &mut ReliableSender,
    transport: &T,
    dest: SocketAddr,
    poll_timeout: Duration,
    clock: &Clock,
    stop: &AtomicBool,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while !sender.is_complete() && !stop.load(Ordering::Relaxed) {
        sender.transmit_due(clock.now(), |seg| {
            if !transport.poll_writable(Duration::ZERO) {
                return false;
            }
            match transport.send_to(&seg.wire, dest) {
                Some(n) if n == seg.wire.len() => true,
                Some(n) => {
                    // Counted as sent; the retransmit timer covers it.
                    tracing::warn!(
                        stream = %seg.stream_id,
                        seq = seg.index,
                        sent = n,
                        len = seg.wire.len(),
                        "partial send"
                    );
                    true
                }
                None => false,
            }
        });

        if transport.poll_readable(poll_timeout) {
            if let Some((n, _peer)) = transport.recv_from(&mut buf) {
                sender.handle_datagram(Bytes::copy_from_slice(&buf[..n]));
            }
        }
    }
}

/// Handle to a sender running on its own thread.
///
/// Dropping the handle stops the sender and joins the thread.
pub struct SenderHandle {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<SenderReport>>,
}

impl SenderHandle {
    pub fn spawn<T>(
        mut sender: ReliableSender,
        transport: T,
        dest: SocketAddr,
        poll_timeout: Duration,
    ) -> Result<Self>
    where
        T: Transport + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("ferry-sender".into())
            .spawn(move || {
                let clock = Clock::new();
                run_sender(&mut sender, &transport, dest, poll_timeout, &clock, &stop_flag);
                sender.into_report()
            })
            .context("failed to spawn sender thread")?;

        Ok(SenderHandle {
            stop,
            handle: Some(handle),
        })
    }

    /// Shared stop flag, e.g. for a signal handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the sender thread and return its final report.
    pub fn join(mut self) -> Result<SenderReport> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("sender already joined"))?;
        handle.join().map_err(|_| anyhow!("sender thread panicked"))
    }
}

impl Drop for SenderHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.store(true, Ordering::Relaxed);
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_transport::reassembly::{Reassembler, ReassemblyConfig};
    use ferry_transport::segment::{SegmentState, Segmenter, SegmenterConfig, StreamIdAllocator};
    use ferry_transport::sender::{ChecksumVerdict, SenderConfig};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// In-process peer: every sent datagram goes straight through a
    /// reassembler, and its reply is queued for the next receive.
    struct Loopback {
        rx: RefCell<Reassembler>,
        clock: Clock,
        inbox: RefCell<VecDeque<Bytes>>,
        writable: bool,
        sent: RefCell<usize>,
        /// Report this many bytes short on every send.
        short_by: usize,
        polls: RefCell<usize>,
        /// Raise the flag once this many read polls have happened.
        halt_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl Loopback {
        fn new(clock: Clock) -> Self {
            Loopback {
                rx: RefCell::new(Reassembler::new(ReassemblyConfig::default(), clock.now())),
                clock,
                inbox: RefCell::new(VecDeque::new()),
                writable: true,
                sent: RefCell::new(0),
                short_by: 0,
                polls: RefCell::new(0),
                halt_after: None,
            }
        }
    }

    impl Transport for Loopback {
        fn poll_readable(&self, _timeout: Duration) -> bool {
            let mut polls = self.polls.borrow_mut();
            *polls += 1;
            if let Some((limit, flag)) = &self.halt_after {
                if *polls >= *limit {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            !self.inbox.borrow().is_empty()
        }

        fn poll_writable(&self, _timeout: Duration) -> bool {
            self.writable
        }

        fn send_to(&self, buf: &[u8], _peer: SocketAddr) -> Option<usize> {
            *self.sent.borrow_mut() += 1;
            let now = self.clock.now();
            if let Some(reply) = self.rx.borrow_mut().process(Bytes::copy_from_slice(buf), now) {
                self.inbox.borrow_mut().push_back(reply);
            }
            Some(buf.len() - self.short_by)
        }

        fn recv_from(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
            let msg = self.inbox.borrow_mut().pop_front()?;
            buf[..msg.len()].copy_from_slice(&msg);
            Some((msg.len(), SocketAddr::from(([127, 0, 0, 1], 9))))
        }
    }

    fn sender(streams: u32, segments: u32) -> ReliableSender {
        let mut gen = Segmenter::with_seed(
            SegmenterConfig::default(),
            Arc::new(StreamIdAllocator::new()),
            21,
        );
        let streams = (0..streams).map(|_| gen.generate(segments)).collect();
        let mut tx = ReliableSender::new(SenderConfig::default(), streams);
        tx.shuffle_seeded(3);
        tx
    }

    fn dest() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    #[test]
    fn drives_all_streams_to_completion() {
        let (clock, _mock) = Clock::mock();
        let link = Loopback::new(clock.clone());
        let mut tx = sender(3, 20);
        let stop = AtomicBool::new(false);

        run_sender(&mut tx, &link, dest(), Duration::from_secs(1), &clock, &stop);

        assert!(tx.is_complete());
        assert_eq!(*link.sent.borrow(), 60);
        assert!(tx.streams().iter().all(|s| s.verdict() == ChecksumVerdict::Matched));
    }

    #[test]
    fn unwritable_transport_sends_nothing() {
        let (clock, _mock) = Clock::mock();
        let stop = Arc::new(AtomicBool::new(false));
        let mut link = Loopback::new(clock.clone());
        link.writable = false;
        link.halt_after = Some((5, stop.clone()));
        let mut tx = sender(1, 4);

        // Unsent segments stay due, so every turn goes back through the gate.
        run_sender(&mut tx, &link, dest(), Duration::ZERO, &clock, &stop);

        assert_eq!(*link.polls.borrow(), 5);
        assert_eq!(*link.sent.borrow(), 0);
        assert_eq!(tx.stats().transmissions, 0);
        assert!(tx.segments().iter().all(|s| s.state() == SegmentState::Unsent));
        assert!(!tx.is_complete());
    }

    #[test]
    fn partial_send_counts_as_transmission() {
        let (clock, _mock) = Clock::mock();
        let mut link = Loopback::new(clock.clone());
        link.short_by = 1;
        let mut tx = sender(1, 2);
        let stop = AtomicBool::new(false);

        run_sender(&mut tx, &link, dest(), Duration::ZERO, &clock, &stop);
        assert!(tx.is_complete());
        assert_eq!(tx.stats().transmissions, 2);
    }
}

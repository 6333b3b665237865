//! # Dispatcher
//!
//! Owns one [`Reassembler`] per peer and runs every one of them on a single
//! worker thread. Producers (the socket read loop) push datagrams into an
//! unbounded request channel; the send loop pulls replies from a response
//! channel. Neither side ever waits on protocol work.
//!
//! Worker loop:
//! 1. Block until a request or shutdown arrives.
//! 2. Take that request plus everything already queued behind it as one
//!    batch, and process the batch in arrival order.
//! 3. Sweep sessions: drop every peer whose reassembler is idle or expired.
//!
//! Requests are handled in strict enqueue order across batches. Shutdown is
//! cooperative: queued requests after the shutdown marker are discarded and
//! the worker exits; [`Dispatcher::stop`] joins it.

use anyhow::{Context, Result};
use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use ferry_transport::reassembly::{Reassembler, ReassemblyConfig};
use ferry_transport::stats::ReassemblerStats;
use quanta::Clock;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// A reply produced by a peer's reassembler, addressed back to that peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub peer: SocketAddr,
    pub bytes: Bytes,
}

enum Inbound {
    Datagram { peer: SocketAddr, bytes: Bytes },
    Shutdown,
}

/// Dispatcher counters, refreshed after every batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Datagrams processed by the worker.
    pub requests: u64,
    /// Replies queued for sending.
    pub responses: u64,
    pub batches: u64,
    pub peers_created: u64,
    pub peers_reclaimed: u64,
    pub active_peers: u64,
    /// Sum over every session, live or reclaimed.
    pub reassembly: ReassemblerStats,
}

/// Thread-safe handle to the dispatcher worker.
///
/// Dropping the handle stops and joins the worker.
pub struct Dispatcher {
    request_tx: Sender<Inbound>,
    response_rx: Receiver<Response>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<DispatcherStats>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(config: ReassemblyConfig) -> Result<Self> {
        Self::with_clock(config, Clock::new())
    }

    /// Build a dispatcher that reads time from `clock` (mockable in tests).
    pub fn with_clock(config: ReassemblyConfig, clock: Clock) -> Result<Self> {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(DispatcherStats::default()));

        let worker = Worker {
            config,
            clock,
            peers: HashMap::new(),
            retired: ReassemblerStats::default(),
            stats: DispatcherStats::default(),
            shared: stats.clone(),
            responses: response_tx,
        };
        let handle = thread::Builder::new()
            .name("ferry-dispatch".into())
            .spawn(move || worker.run(request_rx))
            .context("failed to spawn dispatcher worker")?;

        Ok(Dispatcher {
            request_tx,
            response_rx,
            shutdown,
            stats,
            handle: Some(handle),
        })
    }

    /// Queue a datagram from `peer`. Never blocks. Returns `false` once the
    /// dispatcher has been stopped.
    pub fn enqueue_request(&self, peer: SocketAddr, bytes: Bytes) -> bool {
        if self.shutdown.load(Ordering::Relaxed) {
            return false;
        }
        self.request_tx.send(Inbound::Datagram { peer, bytes }).is_ok()
    }

    /// Take every reply accumulated so far, in production order.
    pub fn drain_responses(&self) -> Vec<Response> {
        self.response_rx.try_iter().collect()
    }

    pub fn has_responses(&self) -> bool {
        !self.response_rx.is_empty()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Signal the worker and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.request_tx.send(Inbound::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("dispatcher worker panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

struct Worker {
    config: ReassemblyConfig,
    clock: Clock,
    peers: HashMap<SocketAddr, Reassembler>,
    /// Counters of sessions already reclaimed.
    retired: ReassemblerStats,
    stats: DispatcherStats,
    shared: Arc<Mutex<DispatcherStats>>,
    responses: Sender<Response>,
}

impl Worker {
    fn run(mut self, requests: Receiver<Inbound>) {
        while let Ok(first) = requests.recv() {
            let mut stopping = false;
            for msg in std::iter::once(first).chain(requests.try_iter()) {
                match msg {
                    Inbound::Datagram { peer, bytes } => self.handle(peer, bytes),
                    Inbound::Shutdown => {
                        stopping = true;
                        break;
                    }
                }
            }
            self.stats.batches += 1;
            self.sweep();
            self.publish();
            if stopping {
                break;
            }
        }
        self.publish();
        tracing::debug!(peers = self.peers.len(), "dispatcher worker exiting");
    }

    fn handle(&mut self, peer: SocketAddr, bytes: Bytes) {
        let now = self.clock.now();
        self.stats.requests += 1;
        let config = &self.config;
        let created = &mut self.stats.peers_created;
        let session = self.peers.entry(peer).or_insert_with(|| {
            *created += 1;
            tracing::debug!(%peer, "new peer session");
            Reassembler::new(config.clone(), now)
        });

        if let Some(reply) = session.process(bytes, now) {
            self.stats.responses += 1;
            let _ = self.responses.send(Response { peer, bytes: reply });
        }
    }

    fn sweep(&mut self) {
        let now = self.clock.now();
        let retired = &mut self.retired;
        let reclaimed = &mut self.stats.peers_reclaimed;
        self.peers.retain(|peer, session| {
            let expired = session.is_expired(now);
            if !(session.is_idle() || expired) {
                return true;
            }
            if expired && !session.is_idle() {
                tracing::info!(%peer, streams = session.active_streams(), "peer session expired");
            }
            retired.merge(session.stats());
            *reclaimed += 1;
            false
        });
    }

    fn publish(&mut self) {
        let mut total = self.retired.clone();
        for session in self.peers.values() {
            total.merge(session.stats());
        }
        self.stats.reassembly = total;
        self.stats.active_peers = self.peers.len() as u64;
        *self.shared.lock().unwrap_or_else(|e| e.into_inner()) = self.stats.clone();
    }
}

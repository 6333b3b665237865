//! Non-blocking UDP endpoint backed by `std::net::UdpSocket`, with
//! `poll(2)` readiness checks and bind retry on address conflicts.

use anyhow::{Context, Result};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::thread;
use std::time::Duration;

use super::Transport;

/// Pause between bind attempts while the address is in use.
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(10);

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Wrap an already-bound socket, switching it to non-blocking mode.
    pub fn from_socket(socket: UdpSocket) -> Result<Self> {
        socket
            .set_nonblocking(true)
            .context("failed to make socket non-blocking")?;
        Ok(UdpTransport { socket })
    }

    /// Bind `addr`, retrying every 10 ms while it is in use, for at most
    /// `timeout`. Any other bind error fails immediately.
    pub fn bind_with_retry(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let start = quanta::Instant::now();
        let socket = loop {
            match UdpSocket::bind(addr) {
                Ok(s) => break s,
                Err(e) if e.kind() == io::ErrorKind::AddrInUse && start.elapsed() <= timeout => {
                    tracing::debug!(%addr, "address in use, retrying bind");
                    thread::sleep(BIND_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("can't bind {addr} (gave up after {}ms)", start.elapsed().as_millis())
                    });
                }
            }
        };
        Self::from_socket(socket)
    }

    /// An ephemeral local endpoint suitable for talking to `peer`.
    pub fn ephemeral_for(peer: SocketAddr) -> Result<Self> {
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).context("failed to bind ephemeral UDP socket")?;
        Self::from_socket(socket)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn poll(&self, events: libc::c_short, timeout: Duration) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.socket.as_raw_fd(),
            events,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: `pfd` is a valid pollfd for the duration of the call and
        // nfds is 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        rc > 0 && (pfd.revents & events) != 0
    }
}

impl Transport for UdpTransport {
    fn poll_readable(&self, timeout: Duration) -> bool {
        self.poll(libc::POLLIN, timeout)
    }

    fn poll_writable(&self, timeout: Duration) -> bool {
        self.poll(libc::POLLOUT, timeout)
    }

    fn send_to(&self, buf: &[u8], peer: SocketAddr) -> Option<usize> {
        match self.socket.send_to(buf, peer) {
            Ok(n) => Some(n),
            Err(e) if is_transient(&e) => None,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "send failed");
                None
            }
        }
    }

    fn recv_from(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        match self.socket.recv_from(buf) {
            Ok((n, peer)) => Some((n, peer)),
            Err(e) if is_transient(&e) => None,
            Err(e) => {
                tracing::debug!(error = %e, "recv failed");
                None
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Resolve `host:port`, preferring an IPv4 address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}:{port}"))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| anyhow::anyhow!("{host}:{port} resolved to no addresses"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> UdpTransport {
        UdpTransport::bind_with_retry("127.0.0.1:0".parse().unwrap(), Duration::from_millis(100))
            .unwrap()
    }

    #[test]
    fn send_and_receive_over_loopback() {
        let a = loopback();
        let b = loopback();
        let b_addr = b.local_addr().unwrap();

        assert!(a.poll_writable(Duration::ZERO));
        assert_eq!(a.send_to(b"ping", b_addr), Some(4));
        assert!(b.poll_readable(Duration::from_secs(1)));

        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[test]
    fn empty_socket_reports_no_data() {
        let a = loopback();
        assert!(!a.poll_readable(Duration::from_millis(5)));
        let mut buf = [0u8; 16];
        assert!(a.recv_from(&mut buf).is_none());
    }

    #[test]
    fn bind_conflict_times_out() {
        let held = loopback();
        let addr = held.local_addr().unwrap();
        let start = std::time::Instant::now();
        let err = UdpTransport::bind_with_retry(addr, Duration::from_millis(50));
        assert!(err.is_err());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn resolve_prefers_ipv4() {
        let addr = resolve("localhost", 4000).unwrap();
        assert_eq!(addr.port(), 4000);
        assert!(addr.is_ipv4(), "localhost resolved to {addr}");
        assert_eq!(resolve("127.0.0.1", 1).unwrap(), "127.0.0.1:1".parse().unwrap());
    }
}

// TCP client transport (Outgoer) with non-blocking connect and reconnect timer
use hio_core::{monotonic, resolve_host, Result, SharedClock, Timer, Verbosity};
use hio_wirelog::WireLog;
use nix::errno::Errno;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, trace};

use crate::link::Link;
use crate::sockopt;
use crate::traits::Transport;

/// Default wait between reconnect attempts.
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Active TCP client.
///
/// `CLOSED -> OPENED -> ACCEPTED (= CONNECTED) -> CUTOFF -> CLOSED`
pub struct Outgoer {
    link: Link,
    host: String,
    port: u16,
    ha: SocketAddr,
    local: Option<SocketAddr>,
    reconnectable: bool,
    clock: SharedClock,
    timer: Timer,
}

impl Outgoer {
    /// Resolve `host` once and build an unopened client for it.
    pub fn new(host: &str, port: u16, bs: usize) -> Result<Self> {
        let ha = resolve_host(host, port)?;
        let clock = monotonic();
        Ok(Outgoer {
            link: Link::new(bs),
            host: host.to_string(),
            port,
            ha,
            local: None,
            reconnectable: false,
            timer: Timer::new(clock.clone(), RECONNECT_TIMEOUT),
            clock,
        })
    }

    /// Retry with a fresh socket every `timeout` until the server shows up.
    pub fn reconnectable(mut self, timeout: Duration) -> Self {
        self.reconnectable = true;
        self.timer.restart_with(timeout);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.timer = Timer::new(clock.clone(), self.timer.duration());
        self.clock = clock;
        self
    }

    /// Bind the client side to a fixed local address instead of an ephemeral one.
    pub fn with_local(mut self, local: SocketAddr) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_wirelog(mut self, wlog: WireLog) -> Self {
        self.link.set_wirelog(Some(wlog));
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.link.set_verbosity(verbosity);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Server address this client connects to.
    pub fn ha(&self) -> SocketAddr {
        self.ha
    }

    /// Local address of the established connection.
    pub fn ca(&self) -> Option<SocketAddr> {
        self.link.local_addr()
    }

    pub fn opened(&self) -> bool {
        self.link.is_open()
    }

    pub fn is_reconnectable(&self) -> bool {
        self.reconnectable
    }

    /// Time left before the next reconnect attempt is permitted.
    pub fn reconnect_remaining(&self) -> Duration {
        self.timer.remaining()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn try_open(&self) -> io::Result<Socket> {
        let sock = Socket::new(Domain::for_address(self.ha), Type::STREAM, Some(Protocol::TCP))?;
        sock.set_reuse_address(true)?;
        sockopt::ensure_buf_sizes(&sock, self.link.bs())?;
        sock.set_nonblocking(true)?;
        if let Some(local) = self.local {
            sock.bind(&local.into())?;
        }
        Ok(sock)
    }

    /// Create the non-blocking stream socket. Failures are logged, not raised.
    pub fn open(&mut self) -> bool {
        self.link.close();
        match self.try_open() {
            Ok(sock) => {
                self.link.attach(sock);
                self.timer.restart();
                if self.link.verbosity().allows(Verbosity::Concise) {
                    info!(ha = %self.ha, "outgoer opened");
                }
                true
            }
            Err(e) => {
                if self.link.verbosity().allows(Verbosity::Terse) {
                    error!(ha = %self.ha, error = %e, "outgoer open failed");
                }
                false
            }
        }
    }

    /// Close, re-resolve the host and open again.
    pub fn reopen(&mut self) -> bool {
        self.close();
        match resolve_host(&self.host, self.port) {
            Ok(ha) => self.ha = ha,
            Err(e) => {
                if self.link.verbosity().allows(Verbosity::Terse) {
                    error!(host = %self.host, port = self.port, error = %e, "outgoer resolve failed");
                }
                return false;
            }
        }
        self.open()
    }

    pub fn close(&mut self) {
        self.link.close();
    }

    /// Drive the non-blocking connect one step. True once established.
    pub fn accept(&mut self) -> Result<bool> {
        if self.link.accepted() {
            return Ok(true);
        }
        let Some(sock) = self.link.socket() else {
            return Ok(false);
        };
        match sock.connect(&SockAddr::from(self.ha)) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(Errno::EISCONN as i32) => {}
            Err(e) => {
                if self.link.verbosity().allows(Verbosity::Profuse) {
                    trace!(ha = %self.ha, error = %e, "connect pending");
                }
                return Ok(false);
            }
        }
        let local = sock.local_addr()?.as_socket();
        let peer = sock.peer_addr()?.as_socket();
        self.link.set_addrs(local, peer);
        self.link.set_accepted(true);
        if self.link.verbosity().allows(Verbosity::Concise) {
            info!(ha = %self.ha, ca = ?local, "outgoer accepted");
        }
        Ok(true)
    }

    /// Plain TCP is usable as soon as the connect completes.
    pub fn connect(&mut self) -> Result<bool> {
        let accepted = self.accept()?;
        self.link.set_connected(accepted);
        Ok(accepted)
    }

    /// Reopen the socket when reconnecting is enabled and the timer has run out.
    ///
    /// Returns true when a fresh socket was opened.
    pub fn retry_due(&mut self) -> bool {
        if !self.reconnectable || !self.timer.expired() {
            return false;
        }
        if self.link.verbosity().allows(Verbosity::Verbose) {
            debug!(ha = %self.ha, "outgoer reconnecting");
        }
        let reopened = self.reopen();
        self.timer.restart();
        reopened
    }

    /// Per-tick entry point: connect if needed, reconnect on timeout.
    pub fn service_connect(&mut self) -> Result<bool> {
        if !self.link.connected() {
            self.connect()?;
            if !self.link.connected() {
                self.retry_due();
            }
        }
        Ok(self.link.connected())
    }
}

impl Transport for Outgoer {
    fn link(&self) -> &Link {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        self.link.receive()
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.link.send(data)
    }
}

impl std::fmt::Debug for Outgoer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outgoer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ha", &self.ha)
            .field("reconnectable", &self.reconnectable)
            .field("link", &self.link)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hio_core::ManualClock;
    use std::net::TcpListener;
    use std::sync::Arc;

    #[test]
    fn unopened_client_never_connects() {
        let mut client = Outgoer::new("127.0.0.1", 9, crate::BUF_SIZE).unwrap();
        assert!(!client.opened());
        assert!(!client.service_connect().unwrap());
        assert_eq!(client.receive().unwrap(), None);
        assert_eq!(client.send(b"x").unwrap(), 0);
        assert_eq!(client.actual_buf_sizes(), (0, 0));
    }

    #[test]
    fn reconnect_waits_for_timer() {
        // reserve a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let clock = ManualClock::new();
        let mut client = Outgoer::new("127.0.0.1", port, crate::BUF_SIZE)
            .unwrap()
            .with_clock(Arc::new(clock.clone()))
            .reconnectable(Duration::from_millis(500));
        assert!(client.open());
        assert_eq!(client.reconnect_remaining(), Duration::from_millis(500));

        assert!(!client.service_connect().unwrap());
        clock.advance(Duration::from_millis(200));
        assert!(!client.service_connect().unwrap());
        assert_eq!(client.reconnect_remaining(), Duration::from_millis(300));

        clock.advance(Duration::from_millis(300));
        assert!(!client.service_connect().unwrap());
        // the timer restarted along with the fresh socket
        assert_eq!(client.reconnect_remaining(), Duration::from_millis(500));
        assert!(client.opened());
    }

    #[test]
    fn reopen_resets_flags() {
        let mut client = Outgoer::new("localhost", 9, crate::BUF_SIZE).unwrap();
        for _ in 0..3 {
            assert!(client.reopen());
        }
        assert!(client.opened());
        assert!(!client.accepted());
        assert!(!client.connected());
        assert!(!client.cutoff());
    }
}

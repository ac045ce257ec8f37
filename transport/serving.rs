// Server side of the stream transport: listening Acceptor, per-connection Incomer
// and the Server that keeps the incomers keyed by peer address
use hio_core::{external_addr, resolve_host, Error, Result, Verbosity};
use hio_wirelog::WireLog;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::link::Link;
use crate::sockopt;
use crate::traits::Transport;

const BACKLOG: i32 = 5;

/// Server-side end of one accepted connection. Starts out connected.
pub struct Incomer {
    link: Link,
    ha: SocketAddr,
    ca: SocketAddr,
}

impl Incomer {
    /// Adopt an accepted stream. `ha` is the listener address, `ca` the peer.
    pub fn new(stream: TcpStream, ha: SocketAddr, ca: SocketAddr, bs: usize) -> Result<Self> {
        // accepted sockets do not inherit O_NONBLOCK everywhere
        stream.set_nonblocking(true)?;
        let local = stream.local_addr().ok();
        let mut link = Link::new(bs);
        link.attach(Socket::from(stream));
        link.set_addrs(local, Some(ca));
        link.set_accepted(true);
        link.set_connected(true);
        Ok(Incomer { link, ha, ca })
    }

    pub fn with_wirelog(mut self, wlog: Option<WireLog>) -> Self {
        self.link.set_wirelog(wlog);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.link.set_verbosity(verbosity);
        self
    }

    pub fn ha(&self) -> SocketAddr {
        self.ha
    }

    pub fn ca(&self) -> SocketAddr {
        self.ca
    }

    pub fn close(&mut self) {
        self.link.close();
    }
}

impl Transport for Incomer {
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

/// Listening socket that hands out accepted streams untouched.
pub struct Acceptor {
    ha: SocketAddr,
    eha: SocketAddr,
    bs: usize,
    listener: Option<TcpListener>,
    axes: VecDeque<(TcpStream, SocketAddr)>,
    verbosity: Verbosity,
}

impl Acceptor {
    pub fn new(ha: SocketAddr, bs: usize) -> Self {
        Acceptor {
            ha,
            eha: external_addr(ha),
            bs,
            listener: None,
            axes: VecDeque::new(),
            verbosity: Verbosity::Mute,
        }
    }

    pub fn bind(host: &str, port: u16, bs: usize) -> Result<Self> {
        Ok(Self::new(resolve_host(host, port)?, bs))
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn ha(&self) -> SocketAddr {
        self.ha
    }

    /// Address remote peers use to reach this listener.
    pub fn eha(&self) -> SocketAddr {
        self.eha
    }

    pub fn bs(&self) -> usize {
        self.bs
    }

    pub fn opened(&self) -> bool {
        self.listener.is_some()
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    fn try_open(&self) -> io::Result<TcpListener> {
        let sock = Socket::new(Domain::for_address(self.ha), Type::STREAM, Some(Protocol::TCP))?;
        sock.set_reuse_address(true)?;
        sockopt::ensure_buf_sizes(&sock, self.bs)?;
        sock.set_nonblocking(true)?;
        sock.bind(&self.ha.into())?;
        sock.listen(BACKLOG)?;
        Ok(sock.into())
    }

    /// Bind and listen. Failures are logged and reported as false.
    pub fn open(&mut self) -> bool {
        self.close();
        match self.try_open() {
            Ok(listener) => {
                if let Ok(ha) = listener.local_addr() {
                    self.ha = ha;
                    self.eha = external_addr(ha);
                }
                self.listener = Some(listener);
                if self.verbosity.allows(Verbosity::Concise) {
                    info!(ha = %self.ha, eha = %self.eha, "acceptor listening");
                }
                true
            }
            Err(e) => {
                if self.verbosity.allows(Verbosity::Terse) {
                    error!(ha = %self.ha, error = %e, "acceptor open failed");
                }
                false
            }
        }
    }

    pub fn reopen(&mut self) -> bool {
        self.close();
        self.open()
    }

    /// Stop listening; streams accepted but not yet claimed are dropped.
    pub fn close(&mut self) {
        self.listener = None;
        self.axes.clear();
    }

    /// One non-blocking accept; `None` when nobody is waiting.
    pub fn accept(&mut self) -> Result<Option<(TcpStream, SocketAddr)>> {
        let Some(listener) = &self.listener else {
            return Ok(None);
        };
        match listener.accept() {
            Ok((stream, ca)) => Ok(Some((stream, ca))),
            Err(e) if hio_core::is_retryable(&e) => Ok(None),
            Err(e) => {
                if self.verbosity.allows(Verbosity::Terse) {
                    error!(ha = %self.ha, error = %e, "accept failed");
                }
                Err(e.into())
            }
        }
    }

    /// Accept every pending connection into the internal queue.
    pub fn service_accepts(&mut self) -> Result<usize> {
        let mut count = 0;
        while let Some(ax) = self.accept()? {
            self.axes.push_back(ax);
            count += 1;
        }
        Ok(count)
    }

    /// Take the oldest accepted stream not yet claimed.
    pub fn pop_accepted(&mut self) -> Option<(TcpStream, SocketAddr)> {
        self.axes.pop_front()
    }

    /// Check that an accepted stream agrees with this listener's view of it.
    pub fn check_admission(&self, stream: &TcpStream, ca: SocketAddr) -> Result<()> {
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;
        if peer != ca || local.port() != self.ha.port() {
            return Err(Error::Inconsistent(format!(
                "accepted {} but socket reports peer {} local {} (listener {})",
                ca, peer, local, self.ha
            )));
        }
        Ok(())
    }
}

/// Listener plus the live connections it accepted, keyed by peer address.
///
/// Connections are never evicted automatically; callers watch `cutoff` and
/// call [`remove_ix`](Self::remove_ix).
pub struct Server<I = Incomer> {
    acceptor: Acceptor,
    ixes: BTreeMap<SocketAddr, I>,
    wlog: Option<WireLog>,
}

impl<I> Server<I> {
    pub fn new(acceptor: Acceptor) -> Self {
        Server {
            acceptor,
            ixes: BTreeMap::new(),
            wlog: None,
        }
    }

    pub fn bind(host: &str, port: u16, bs: usize) -> Result<Self> {
        Ok(Self::new(Acceptor::bind(host, port, bs)?))
    }

    pub fn with_wirelog(mut self, wlog: WireLog) -> Self {
        self.wlog = Some(wlog);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.acceptor.verbosity = verbosity;
        self
    }

    pub fn acceptor(&self) -> &Acceptor {
        &self.acceptor
    }

    pub fn acceptor_mut(&mut self) -> &mut Acceptor {
        &mut self.acceptor
    }

    pub fn wirelog(&self) -> Option<&WireLog> {
        self.wlog.as_ref()
    }

    pub fn verbosity(&self) -> Verbosity {
        self.acceptor.verbosity
    }

    pub fn ha(&self) -> SocketAddr {
        self.acceptor.ha()
    }

    pub fn eha(&self) -> SocketAddr {
        self.acceptor.eha()
    }

    pub fn opened(&self) -> bool {
        self.acceptor.opened()
    }

    pub fn open(&mut self) -> bool {
        self.acceptor.open()
    }

    pub fn reopen(&mut self) -> bool {
        self.acceptor.reopen()
    }

    /// Stop listening. Existing connections stay in `ixes`.
    pub fn close(&mut self) {
        self.acceptor.close();
    }

    pub fn ixes(&self) -> &BTreeMap<SocketAddr, I> {
        &self.ixes
    }

    pub fn ix(&self, ca: &SocketAddr) -> Option<&I> {
        self.ixes.get(ca)
    }

    pub fn ix_mut(&mut self, ca: &SocketAddr) -> Option<&mut I> {
        self.ixes.get_mut(ca)
    }

    /// Look up a connection, treating an unknown key as caller error.
    pub fn ix_checked(&mut self, ca: &SocketAddr) -> Result<&mut I> {
        self.ixes
            .get_mut(ca)
            .ok_or_else(|| Error::InvalidAddress(format!("no connection from {}", ca)))
    }

    /// Register a connection, replacing any stale one from the same peer.
    pub fn add_ix(&mut self, ca: SocketAddr, ix: I) {
        if self.ixes.insert(ca, ix).is_some() && self.verbosity().allows(Verbosity::Terse) {
            warn!(%ca, "replaced existing connection");
        }
    }

    pub fn remove_ix(&mut self, ca: &SocketAddr) -> Result<I> {
        self.ixes
            .remove(ca)
            .ok_or_else(|| Error::InvalidAddress(format!("no connection from {}", ca)))
    }
}

impl<I: Transport> Server<I> {
    pub fn transmit_ix(&mut self, data: &[u8], ca: &SocketAddr) -> Result<()> {
        self.ix_checked(ca)?.tx(data);
        Ok(())
    }

    pub fn service_txes_ix(&mut self, ca: &SocketAddr) -> Result<()> {
        self.ix_checked(ca)?.service_txes()
    }

    pub fn service_receives_ix(&mut self, ca: &SocketAddr) -> Result<()> {
        self.ix_checked(ca)?.service_receives()
    }

    pub fn service_rxes_ix(&mut self, ca: &SocketAddr) -> Result<usize> {
        Ok(self.ix_checked(ca)?.service_rxes())
    }

    pub fn cat_rxes_ix(&mut self, ca: &SocketAddr) -> Result<Vec<u8>> {
        Ok(self.ix_checked(ca)?.cat_rxes())
    }

    pub fn clear_rxbs_ix(&mut self, ca: &SocketAddr) -> Result<()> {
        self.ix_checked(ca)?.clear_rxbs();
        Ok(())
    }

    pub fn tail_rxbs_ix(&self, ca: &SocketAddr, index: usize) -> Result<(&[u8], usize)> {
        self.ixes
            .get(ca)
            .map(|ix| ix.tail_rxbs(index))
            .ok_or_else(|| Error::InvalidAddress(format!("no connection from {}", ca)))
    }

    pub fn shutdown_ix(&mut self, ca: &SocketAddr, how: Shutdown) -> Result<()> {
        self.ix_checked(ca)?.shutdown(how);
        Ok(())
    }

    pub fn shutdown_send_ix(&mut self, ca: &SocketAddr) -> Result<()> {
        self.shutdown_ix(ca, Shutdown::Write)
    }

    pub fn shutdown_receive_ix(&mut self, ca: &SocketAddr) -> Result<()> {
        self.shutdown_ix(ca, Shutdown::Read)
    }

    pub fn shutclose_ix(&mut self, ca: &SocketAddr) -> Result<()> {
        self.ix_checked(ca)?.shutclose();
        Ok(())
    }

    /// Shut and close every connection, leaving the entries for the caller.
    pub fn close_all_ix(&mut self) {
        for ix in self.ixes.values_mut() {
            ix.shutclose();
        }
    }

    pub fn service_receives_all_ix(&mut self) -> Result<()> {
        for ix in self.ixes.values_mut() {
            ix.service_receives()?;
        }
        Ok(())
    }

    pub fn service_rxes_all_ix(&mut self) {
        for ix in self.ixes.values_mut() {
            ix.service_rxes();
        }
    }

    pub fn service_all_rx_all_ix(&mut self) -> Result<()> {
        for ix in self.ixes.values_mut() {
            ix.service_all_rx()?;
        }
        Ok(())
    }

    pub fn service_txes_all_ix(&mut self) -> Result<()> {
        for ix in self.ixes.values_mut() {
            ix.service_txes()?;
        }
        Ok(())
    }

    /// Peers whose connection has been cut off, for the caller to evict.
    pub fn cutoff_ixes(&self) -> Vec<SocketAddr> {
        self.ixes
            .iter()
            .filter(|(_, ix)| ix.cutoff())
            .map(|(ca, _)| *ca)
            .collect()
    }
}

impl Server<Incomer> {
    /// Wrap every queued accepted stream in an `Incomer`.
    pub fn service_axes(&mut self) -> Result<()> {
        self.acceptor.service_accepts()?;
        while let Some((stream, ca)) = self.acceptor.pop_accepted() {
            self.acceptor.check_admission(&stream, ca)?;
            let incomer = Incomer::new(stream, self.acceptor.ha(), ca, self.acceptor.bs())?
                .with_wirelog(self.wlog.clone())
                .with_verbosity(self.verbosity());
            if self.verbosity().allows(Verbosity::Concise) {
                info!(ha = %self.acceptor.ha(), %ca, "incomer admitted");
            }
            self.add_ix(ca, incomer);
        }
        Ok(())
    }

    /// Per-tick entry point for new connections.
    pub fn service_connects(&mut self) -> Result<()> {
        self.service_axes()
    }
}

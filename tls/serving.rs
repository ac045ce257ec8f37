// TLS server side: per-connection IncomerTls and the ServerTls that stages
// accepted sockets until their handshake completes
use hio_core::{Error, Result, Verbosity};
use hio_transport::{Incomer, Link, Server, Transport};
use hio_wirelog::WireLog;
use rustls::ServerConfig;
use std::collections::BTreeMap;
use std::net::{Shutdown, SocketAddr};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::TlsConfig;
use crate::session::{self, Session};

/// Accepted connection with a server session. Not connected until the handshake completes.
pub struct IncomerTls {
    incomer: Incomer,
    session: Option<Session>,
}

impl IncomerTls {
    pub fn new(mut incomer: Incomer, config: Arc<ServerConfig>) -> Result<Self> {
        let session = Session::server(config)?;
        incomer.link_mut().set_connected(false);
        Ok(IncomerTls {
            incomer,
            session: Some(session),
        })
    }

    pub fn ha(&self) -> SocketAddr {
        self.incomer.ha()
    }

    pub fn ca(&self) -> SocketAddr {
        self.incomer.ca()
    }

    pub fn close(&mut self) {
        self.session = None;
        self.incomer.close();
    }

    /// One non-blocking handshake step. Fatal errors shut and close.
    pub fn service_handshake(&mut self) -> Result<bool> {
        if self.incomer.connected() {
            return Ok(true);
        }
        let (Some(session), Some(sock)) = (self.session.as_mut(), self.incomer.link().socket()) else {
            return Ok(false);
        };
        match session.handshake(sock) {
            Ok(true) => {
                self.incomer.link_mut().set_connected(true);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                if self.incomer.link().verbosity().allows(Verbosity::Terse) {
                    warn!(ca = %self.incomer.ca(), error = %e, "tls handshake failed");
                }
                self.session = None;
                self.incomer.link_mut().shutclose();
                Err(e)
            }
        }
    }
}

impl Transport for IncomerTls {
    fn link(&self) -> &Link {
        self.incomer.link()
    }

    fn link_mut(&mut self) -> &mut Link {
        self.incomer.link_mut()
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        session::receive(self.incomer.link_mut(), self.session.as_mut())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        session::send(self.incomer.link_mut(), self.session.as_mut(), data)
    }

    fn flush(&mut self) -> Result<()> {
        session::flush(self.incomer.link_mut(), self.session.as_mut())
    }

    fn shutdown(&mut self, how: Shutdown) {
        session::shutdown(self.incomer.link_mut(), self.session.as_mut(), how);
    }

    fn shutclose(&mut self) {
        self.shutdown(Shutdown::Both);
        self.session = None;
        self.incomer.link_mut().close();
    }
}

/// TLS listener. Accepted sockets wait in `cxes` while they handshake and
/// only then join the server's `ixes`.
pub struct ServerTls {
    server: Server<IncomerTls>,
    cxes: BTreeMap<SocketAddr, IncomerTls>,
    config: Arc<ServerConfig>,
}

impl ServerTls {
    pub fn new(server: Server<IncomerTls>, tls: &TlsConfig) -> Result<Self> {
        Ok(ServerTls {
            server,
            cxes: BTreeMap::new(),
            config: tls.server_config()?,
        })
    }

    pub fn bind(host: &str, port: u16, bs: usize, tls: &TlsConfig) -> Result<Self> {
        Self::new(Server::bind(host, port, bs)?, tls)
    }

    pub fn with_wirelog(mut self, wlog: WireLog) -> Self {
        self.server = self.server.with_wirelog(wlog);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.server = self.server.with_verbosity(verbosity);
        self
    }

    pub fn server(&self) -> &Server<IncomerTls> {
        &self.server
    }

    /// Connections still handshaking, keyed by peer address.
    pub fn cxes(&self) -> &BTreeMap<SocketAddr, IncomerTls> {
        &self.cxes
    }

    /// Start listening with no staged handshakes left over.
    pub fn open(&mut self) -> bool {
        self.drop_cxes();
        self.server.open()
    }

    pub fn reopen(&mut self) -> bool {
        self.drop_cxes();
        self.server.reopen()
    }

    /// Stop listening and drop every connection still handshaking.
    pub fn close(&mut self) {
        self.server.close();
        self.drop_cxes();
    }

    fn drop_cxes(&mut self) {
        for cx in self.cxes.values_mut() {
            cx.close();
        }
        self.cxes.clear();
    }

    /// Wrap every queued accepted stream in a server session.
    pub fn service_axes(&mut self) -> Result<()> {
        let verbosity = self.server.verbosity();
        let wlog = self.server.wirelog().cloned();
        let acceptor = self.server.acceptor_mut();
        acceptor.service_accepts()?;
        while let Some((stream, ca)) = acceptor.pop_accepted() {
            acceptor.check_admission(&stream, ca)?;
            let incomer = Incomer::new(stream, acceptor.ha(), ca, acceptor.bs())?
                .with_wirelog(wlog.clone())
                .with_verbosity(verbosity);
            let cx = IncomerTls::new(incomer, self.config.clone())?;
            if verbosity.allows(Verbosity::Verbose) {
                info!(ha = %acceptor.ha(), %ca, "tls connection staged");
            }
            self.cxes.insert(ca, cx);
        }
        Ok(())
    }

    /// Advance every staged handshake; finished ones move into `ixes`.
    pub fn service_cxes(&mut self) -> Result<()> {
        let cas: Vec<SocketAddr> = self.cxes.keys().copied().collect();
        for ca in cas {
            let Some(cx) = self.cxes.get_mut(&ca) else {
                continue;
            };
            match cx.service_handshake() {
                Ok(true) => {
                    if let Some(ix) = self.cxes.remove(&ca) {
                        if self.server.verbosity().allows(Verbosity::Concise) {
                            info!(ha = %self.server.ha(), %ca, "tls incomer admitted");
                        }
                        self.server.add_ix(ca, ix);
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    self.cxes.remove(&ca);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Per-tick entry point for new connections: accept, then handshake.
    pub fn service_connects(&mut self) -> Result<()> {
        self.service_axes()?;
        self.service_cxes()
    }

    /// Remove a connection whether it is live or still handshaking.
    pub fn remove_any(&mut self, ca: &SocketAddr) -> Result<IncomerTls> {
        if let Some(cx) = self.cxes.remove(ca) {
            return Ok(cx);
        }
        self.server
            .remove_ix(ca)
            .map_err(|_| Error::InvalidAddress(format!("no tls connection from {}", ca)))
    }
}

impl Deref for ServerTls {
    type Target = Server<IncomerTls>;

    fn deref(&self) -> &Self::Target {
        &self.server
    }
}

impl DerefMut for ServerTls {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.server
    }
}

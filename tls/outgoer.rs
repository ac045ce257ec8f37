// TLS client: an Outgoer whose `connected` waits for the handshake
use hio_core::{Result, Verbosity};
use hio_transport::{Link, Outgoer, Transport};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::net::Shutdown;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::TlsConfig;
use crate::session::{self, Session};

/// `CLOSED -> OPENED -> ACCEPTED -> [wrap] -> HANDSHAKING -> CONNECTED -> CUTOFF -> CLOSED`
pub struct OutgoerTls {
    outgoer: Outgoer,
    config: Arc<ClientConfig>,
    servername: ServerName<'static>,
    session: Option<Session>,
}

impl OutgoerTls {
    pub fn new(host: &str, port: u16, bs: usize, tls: &TlsConfig) -> Result<Self> {
        Self::from_outgoer(Outgoer::new(host, port, bs)?, tls)
    }

    /// Layer TLS over a configured plain client. Options are validated here.
    pub fn from_outgoer(outgoer: Outgoer, tls: &TlsConfig) -> Result<Self> {
        let config = tls.client_config()?;
        let servername = tls.server_name(outgoer.host())?;
        Ok(OutgoerTls {
            outgoer,
            config,
            servername,
            session: None,
        })
    }

    pub fn outgoer(&self) -> &Outgoer {
        &self.outgoer
    }

    pub fn servername(&self) -> &ServerName<'static> {
        &self.servername
    }

    pub fn opened(&self) -> bool {
        self.outgoer.opened()
    }

    /// True once a session exists for the current socket.
    pub fn wrapped(&self) -> bool {
        self.session.is_some()
    }

    pub fn open(&mut self) -> bool {
        self.session = None;
        self.outgoer.open()
    }

    pub fn reopen(&mut self) -> bool {
        self.session = None;
        self.outgoer.reopen()
    }

    pub fn close(&mut self) {
        self.session = None;
        self.outgoer.close();
    }

    /// Drive the TCP connect; the session is not involved yet.
    pub fn accept(&mut self) -> Result<bool> {
        self.outgoer.accept()
    }

    /// Start a client session on the accepted socket.
    pub fn wrap(&mut self) -> Result<()> {
        self.session = Some(Session::client(self.config.clone(), self.servername.clone())?);
        Ok(())
    }

    /// One non-blocking handshake attempt. Fatal errors shut and close.
    pub fn handshake(&mut self) -> Result<bool> {
        if self.outgoer.connected() {
            return Ok(true);
        }
        let (Some(session), Some(sock)) = (self.session.as_mut(), self.outgoer.link().socket()) else {
            return Ok(false);
        };
        match session.handshake(sock) {
            Ok(true) => {
                self.outgoer.link_mut().set_connected(true);
                if self.outgoer.link().verbosity().allows(Verbosity::Concise) {
                    info!(ha = %self.outgoer.ha(), servername = ?self.servername, "tls handshake complete");
                }
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                if self.outgoer.link().verbosity().allows(Verbosity::Terse) {
                    warn!(ha = %self.outgoer.ha(), error = %e, "tls handshake failed");
                }
                self.session = None;
                self.outgoer.link_mut().shutclose();
                Err(e)
            }
        }
    }

    /// Accept if needed, wrap once accepted, then handshake.
    pub fn connect(&mut self) -> Result<bool> {
        if self.outgoer.connected() {
            return Ok(true);
        }
        if !self.outgoer.accept()? {
            self.session = None;
            return Ok(false);
        }
        if self.session.is_none() {
            if let Err(e) = self.wrap() {
                self.outgoer.link_mut().shutclose();
                return Err(e);
            }
        }
        self.handshake()
    }

    /// Per-tick entry point: connect and handshake, reconnect on timeout.
    pub fn service_connect(&mut self) -> Result<bool> {
        if !self.outgoer.connected() {
            self.connect()?;
            if !self.outgoer.accepted() && self.outgoer.retry_due() {
                self.session = None;
            }
        }
        Ok(self.outgoer.connected())
    }
}

impl Transport for OutgoerTls {
    fn link(&self) -> &Link {
        self.outgoer.link()
    }

    fn link_mut(&mut self) -> &mut Link {
        self.outgoer.link_mut()
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        session::receive(self.outgoer.link_mut(), self.session.as_mut())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        session::send(self.outgoer.link_mut(), self.session.as_mut(), data)
    }

    fn flush(&mut self) -> Result<()> {
        session::flush(self.outgoer.link_mut(), self.session.as_mut())
    }

    fn shutdown(&mut self, how: Shutdown) {
        session::shutdown(self.outgoer.link_mut(), self.session.as_mut(), how);
    }

    fn shutclose(&mut self) {
        self.shutdown(Shutdown::Both);
        self.session = None;
        self.outgoer.link_mut().close();
    }
}

impl std::fmt::Debug for OutgoerTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoerTls")
            .field("servername", &self.servername)
            .field("wrapped", &self.session.is_some())
            .field("outgoer", &self.outgoer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Certify;
    use hio_core::Error;

    #[test]
    fn invalid_options_fail_construction() {
        let tls = TlsConfig {
            certify: Certify::None,
            ..TlsConfig::default()
        };
        let result = OutgoerTls::new("127.0.0.1", 9, hio_transport::BUF_SIZE, &tls);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn servername_defaults_to_host() {
        let client = OutgoerTls::new("localhost", 9, hio_transport::BUF_SIZE, &TlsConfig::default()).unwrap();
        assert_eq!(client.servername(), &ServerName::try_from("localhost").unwrap());
    }

    #[test]
    fn unopened_client_is_inert() {
        let mut client = OutgoerTls::new("127.0.0.1", 9, hio_transport::BUF_SIZE, &TlsConfig::default()).unwrap();
        assert!(!client.service_connect().unwrap());
        assert!(!client.wrapped());
        assert_eq!(client.receive().unwrap(), None);
        assert_eq!(client.send(b"x").unwrap(), 0);
        client.tx(b"queued");
        client.service_txes().unwrap();
        assert_eq!(client.link().txbs().len(), 1);
    }
}

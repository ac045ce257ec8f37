// One rustls connection driven by hand over a non-blocking socket, plus the
// receive/send/flush glue shared by the client and server wrappers
use hio_core::{is_peer_gone, is_retryable, Error, Result, Verbosity};
use hio_transport::Link;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use socket2::Socket;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::config::tls_error;

/// TLS state for one stream. Never touches the socket outside the call it was handed.
pub struct Session {
    conn: Connection,
}

impl Session {
    pub fn client(config: Arc<ClientConfig>, name: ServerName<'static>) -> Result<Self> {
        let conn = ClientConnection::new(config, name).map_err(tls_error)?;
        Ok(Session { conn: conn.into() })
    }

    pub fn server(config: Arc<ServerConfig>) -> Result<Self> {
        let conn = ServerConnection::new(config).map_err(tls_error)?;
        Ok(Session { conn: conn.into() })
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// True while encrypted bytes are waiting for the socket.
    pub fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    /// Write buffered records until drained or the socket would block.
    pub fn flush(&mut self, sock: &Socket) -> Result<()> {
        let mut writer = sock;
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut writer) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if is_retryable(&e) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn read_records(&mut self, sock: &Socket) -> Result<()> {
        let mut reader = sock;
        if self.conn.read_tls(&mut reader)? == 0 {
            return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
        }
        if let Err(e) = self.conn.process_new_packets() {
            // let the peer see our alert
            let _ = self.flush(sock);
            return Err(tls_error(e));
        }
        Ok(())
    }

    /// One non-blocking handshake step. True once the handshake is complete.
    pub fn handshake(&mut self, sock: &Socket) -> Result<bool> {
        loop {
            self.flush(sock)?;
            if !self.conn.is_handshaking() {
                return Ok(true);
            }
            if self.conn.wants_write() {
                return Ok(false);
            }
            match self.read_records(sock) {
                Ok(()) => {}
                Err(e) if e.is_retryable() => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    /// Read plaintext. `None` when nothing is ready, an empty vector once the
    /// peer has closed (close_notify or bare end-of-file).
    pub fn receive(&mut self, sock: &Socket, bs: usize) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; bs];
        loop {
            match self.conn.reader().read(&mut buf) {
                Ok(0) => return Ok(Some(Vec::new())),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(Some(Vec::new())),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
            match self.read_records(sock) {
                Ok(()) => {}
                Err(e) if e.is_retryable() => return Ok(None),
                Err(Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => return Ok(Some(Vec::new())),
                Err(e) => return Err(e),
            }
        }
    }

    /// Hand plaintext to the session. Returns how much it took; `0` while
    /// earlier records are still waiting for the socket.
    pub fn send(&mut self, sock: &Socket, data: &[u8]) -> Result<usize> {
        self.flush(sock)?;
        if self.conn.wants_write() {
            return Ok(0);
        }
        let n = self.conn.writer().write(data)?;
        self.flush(sock)?;
        Ok(n)
    }

    /// Queue close_notify and push it out if the socket allows.
    pub fn close_notify(&mut self, sock: &Socket) {
        self.conn.send_close_notify();
        let _ = self.flush(sock);
    }
}

// A dead channel is cut off before the error goes up.
fn fail(link: &mut Link, e: Error, what: &str) -> Error {
    let dead = match &e {
        Error::Io(io) => is_peer_gone(io),
        Error::Tls(_) => true,
        _ => false,
    };
    if dead {
        link.mark_cutoff();
    }
    if link.verbosity().allows(Verbosity::Terse) {
        warn!(peer = ?link.peer_addr(), error = %e, "tls {} failed", what);
    }
    e
}

pub(crate) fn receive(link: &mut Link, session: Option<&mut Session>) -> Result<Option<Vec<u8>>> {
    if !link.connected() {
        return Ok(None);
    }
    let (Some(session), Some(sock)) = (session, link.socket()) else {
        return Ok(None);
    };
    match session.receive(sock, link.bs()) {
        Ok(Some(data)) if data.is_empty() => {
            link.mark_cutoff();
            Ok(Some(data))
        }
        Ok(Some(data)) => {
            if link.verbosity().allows(Verbosity::Profuse) {
                trace!(peer = ?link.peer_addr(), bytes = data.len(), "tls received");
            }
            link.record_rx(&data);
            Ok(Some(data))
        }
        Ok(None) => Ok(None),
        Err(Error::Io(e)) if e.kind() == ErrorKind::ConnectionReset => {
            link.mark_cutoff();
            Ok(Some(Vec::new()))
        }
        Err(e) => Err(fail(link, e, "receive")),
    }
}

pub(crate) fn send(link: &mut Link, session: Option<&mut Session>, data: &[u8]) -> Result<usize> {
    if !link.connected() {
        return Ok(0);
    }
    let (Some(session), Some(sock)) = (session, link.socket()) else {
        return Ok(0);
    };
    match session.send(sock, data) {
        Ok(n) => {
            if link.verbosity().allows(Verbosity::Profuse) {
                trace!(peer = ?link.peer_addr(), bytes = n, offered = data.len(), "tls sent");
            }
            link.record_tx(&data[..n]);
            Ok(n)
        }
        Err(e) => Err(fail(link, e, "send")),
    }
}

pub(crate) fn flush(link: &mut Link, session: Option<&mut Session>) -> Result<()> {
    let (Some(session), Some(sock)) = (session, link.socket()) else {
        return Ok(());
    };
    match session.flush(sock) {
        Ok(()) => Ok(()),
        Err(e) => Err(fail(link, e, "flush")),
    }
}

/// close_notify first so the peer sees an orderly end of stream.
pub(crate) fn shutdown(link: &mut Link, session: Option<&mut Session>, how: std::net::Shutdown) {
    if how != std::net::Shutdown::Read && link.connected() {
        if let (Some(session), Some(sock)) = (session, link.socket()) {
            session.close_notify(sock);
        }
    }
    link.shutdown(how);
}

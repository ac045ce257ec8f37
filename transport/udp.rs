// UDP transport: non-blocking datagram peer bound to one local address
use hio_buffer::TxQueue;
use hio_core::{is_retryable, resolve_host, Result, Verbosity};
use hio_wirelog::WireLog;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::{error, info, trace};

use crate::sockopt;
use crate::traits::Datagram;

pub struct Peer {
    ha: SocketAddr,
    bs: usize,
    sock: Option<UdpSocket>,
    txes: TxQueue<(Vec<u8>, SocketAddr)>,
    rxes: VecDeque<(Vec<u8>, SocketAddr)>,
    wlog: Option<WireLog>,
    verbosity: Verbosity,
}

impl Peer {
    pub fn new(ha: SocketAddr, bs: usize) -> Self {
        Peer {
            ha,
            bs,
            sock: None,
            txes: TxQueue::new(),
            rxes: VecDeque::new(),
            wlog: None,
            verbosity: Verbosity::Mute,
        }
    }

    /// Resolve `host` and create an unopened peer for it.
    pub fn bind(host: &str, port: u16, bs: usize) -> Result<Self> {
        Ok(Self::new(resolve_host(host, port)?, bs))
    }

    pub fn with_wirelog(mut self, wlog: WireLog) -> Self {
        self.wlog = Some(wlog);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Local address; the OS-assigned one once opened.
    pub fn ha(&self) -> SocketAddr {
        self.ha
    }

    pub fn opened(&self) -> bool {
        self.sock.is_some()
    }

    pub fn rxes(&self) -> &VecDeque<(Vec<u8>, SocketAddr)> {
        &self.rxes
    }

    fn try_open(&self) -> io::Result<UdpSocket> {
        let sock = Socket::new(Domain::for_address(self.ha), Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_reuse_address(true)?;
        sockopt::ensure_buf_sizes(&sock, self.bs)?;
        sock.set_nonblocking(true)?;
        sock.bind(&self.ha.into())?;
        Ok(sock.into())
    }

    /// Create, configure and bind the socket. Failures are logged, not raised.
    pub fn open(&mut self) -> bool {
        self.close();
        let sock = match self.try_open() {
            Ok(sock) => sock,
            Err(e) => {
                if self.verbosity.allows(Verbosity::Terse) {
                    error!(ha = %self.ha, error = %e, "udp open failed");
                }
                return false;
            }
        };
        if let Ok(ha) = sock.local_addr() {
            self.ha = ha;
        }
        self.sock = Some(sock);
        if self.verbosity.allows(Verbosity::Concise) {
            info!(ha = %self.ha, "udp opened");
        }
        true
    }

    pub fn reopen(&mut self) -> bool {
        self.close();
        self.open()
    }

    pub fn close(&mut self) {
        self.sock = None;
    }

    pub fn actual_buf_sizes(&self) -> (usize, usize) {
        sockopt::actual_buf_sizes(self.sock.as_ref())
    }
}

impl Datagram for Peer {
    type Addr = SocketAddr;

    fn send(&mut self, data: &[u8], dest: &SocketAddr) -> Result<usize> {
        let Some(sock) = &self.sock else {
            return Ok(0);
        };
        match sock.send_to(data, dest) {
            Ok(n) => {
                if self.verbosity.allows(Verbosity::Profuse) {
                    trace!(ha = %self.ha, %dest, bytes = n, "udp sent");
                }
                if let Some(wlog) = &self.wlog {
                    wlog.write_tx(dest, &data[..n]);
                }
                Ok(n)
            }
            Err(e) if is_retryable(&e) => Ok(0),
            Err(e) => {
                if self.verbosity.allows(Verbosity::Terse) {
                    error!(ha = %self.ha, %dest, error = %e, "udp send failed");
                }
                Err(e.into())
            }
        }
    }

    fn receive(&mut self) -> Result<(Vec<u8>, Option<SocketAddr>)> {
        let Some(sock) = &self.sock else {
            return Ok((Vec::new(), None));
        };
        let mut buf = vec![0u8; self.bs];
        match sock.recv_from(&mut buf) {
            Ok((n, src)) => {
                buf.truncate(n);
                if self.verbosity.allows(Verbosity::Profuse) {
                    trace!(ha = %self.ha, %src, bytes = n, "udp received");
                }
                if let Some(wlog) = &self.wlog {
                    wlog.write_rx(&src, &buf);
                }
                Ok((buf, Some(src)))
            }
            Err(e) if is_retryable(&e) => Ok((Vec::new(), None)),
            Err(e) => {
                if self.verbosity.allows(Verbosity::Terse) {
                    error!(ha = %self.ha, error = %e, "udp receive failed");
                }
                Err(e.into())
            }
        }
    }

    fn txes_mut(&mut self) -> &mut TxQueue<(Vec<u8>, SocketAddr)> {
        &mut self.txes
    }

    fn rxes_mut(&mut self) -> &mut VecDeque<(Vec<u8>, SocketAddr)> {
        &mut self.rxes
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> Peer {
        let mut peer = Peer::bind("127.0.0.1", 0, crate::BUF_SIZE).unwrap();
        assert!(peer.open());
        peer
    }

    #[test]
    fn open_reports_ephemeral_port() {
        let peer = loopback();
        assert!(peer.opened());
        assert_ne!(peer.ha().port(), 0);
        let (send, recv) = peer.actual_buf_sizes();
        assert!(send >= crate::BUF_SIZE && recv >= crate::BUF_SIZE);
    }

    #[test]
    fn nothing_waiting_is_empty_and_none() {
        let mut peer = loopback();
        let (data, src) = peer.receive().unwrap();
        assert!(data.is_empty());
        assert!(src.is_none());
    }

    #[test]
    fn closed_peer_sends_nothing() {
        let mut peer = loopback();
        let dest = peer.ha();
        peer.close();
        assert!(!peer.opened());
        assert_eq!(peer.send(b"x", &dest).unwrap(), 0);
        assert_eq!(peer.actual_buf_sizes(), (0, 0));
    }
}

// Per-connection state shared by the client (Outgoer) and server (Incomer) roles
use hio_buffer::{RxAccumulator, TxQueue};
use hio_core::{is_peer_gone, is_retryable, Result, Verbosity};
use hio_wirelog::WireLog;
use socket2::Socket;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use tracing::{debug, trace, warn};

use crate::sockopt;

/// One stream socket plus its flags, queues and optional wire log.
///
/// Flags are monotonic within a connection lifetime: once `cutoff` is set it
/// only clears when the socket is closed.
pub struct Link {
    sock: Option<Socket>,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
    bs: usize,
    accepted: bool,
    connected: bool,
    cutoff: bool,
    txbs: TxQueue,
    rx: RxAccumulator,
    wlog: Option<WireLog>,
    verbosity: Verbosity,
}

impl Link {
    pub fn new(bs: usize) -> Self {
        Link {
            sock: None,
            local: None,
            peer: None,
            bs,
            accepted: false,
            connected: false,
            cutoff: false,
            txbs: TxQueue::new(),
            rx: RxAccumulator::new(),
            wlog: None,
            verbosity: Verbosity::Mute,
        }
    }

    /// Install a freshly opened socket, resetting every connection flag.
    pub fn attach(&mut self, sock: Socket) {
        self.sock = Some(sock);
        self.local = None;
        self.peer = None;
        self.accepted = false;
        self.connected = false;
        self.cutoff = false;
    }

    pub fn socket(&self) -> Option<&Socket> {
        self.sock.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.sock.is_some()
    }

    pub fn bs(&self) -> usize {
        self.bs
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn set_addrs(&mut self, local: Option<SocketAddr>, peer: Option<SocketAddr>) {
        self.local = local;
        self.peer = peer;
    }

    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn cutoff(&self) -> bool {
        self.cutoff
    }

    pub fn set_accepted(&mut self, accepted: bool) {
        self.accepted = accepted;
    }

    /// Layered transports (TLS) flip this once their own handshake completes.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn mark_cutoff(&mut self) {
        if !self.cutoff && self.verbosity.allows(Verbosity::Concise) {
            debug!(peer = ?self.peer, "connection cut off");
        }
        self.cutoff = true;
    }

    pub fn txbs(&self) -> &TxQueue {
        &self.txbs
    }

    pub fn txbs_mut(&mut self) -> &mut TxQueue {
        &mut self.txbs
    }

    pub fn rx(&self) -> &RxAccumulator {
        &self.rx
    }

    pub fn rx_mut(&mut self) -> &mut RxAccumulator {
        &mut self.rx
    }

    pub fn wirelog(&self) -> Option<&WireLog> {
        self.wlog.as_ref()
    }

    pub fn set_wirelog(&mut self, wlog: Option<WireLog>) {
        self.wlog = wlog;
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    pub fn record_rx(&self, data: &[u8]) {
        if let (Some(wlog), Some(peer)) = (&self.wlog, self.peer) {
            wlog.write_rx(&peer, data);
        }
    }

    pub fn record_tx(&self, data: &[u8]) {
        if let (Some(wlog), Some(peer)) = (&self.wlog, self.peer) {
            wlog.write_tx(&peer, data);
        }
    }

    /// Plain non-blocking read of up to `bs` bytes.
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.accepted {
            return Ok(None);
        }
        let Some(mut sock) = self.sock.as_ref() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; self.bs];
        match sock.read(&mut buf) {
            Ok(0) => {
                self.mark_cutoff();
                Ok(Some(Vec::new()))
            }
            Ok(n) => {
                buf.truncate(n);
                if self.verbosity.allows(Verbosity::Profuse) {
                    trace!(peer = ?self.peer, bytes = n, "received");
                }
                self.record_rx(&buf);
                Ok(Some(buf))
            }
            Err(e) if is_retryable(&e) => Ok(None),
            // abortive close by the peer is still a close
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                self.mark_cutoff();
                Ok(Some(Vec::new()))
            }
            Err(e) => {
                if self.verbosity.allows(Verbosity::Terse) {
                    warn!(peer = ?self.peer, error = %e, "receive failed");
                }
                Err(e.into())
            }
        }
    }

    /// Plain non-blocking write; a vanished peer sets `cutoff` and is reported.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        let Some(mut sock) = self.sock.as_ref() else {
            return Ok(0);
        };
        match sock.write(data) {
            Ok(n) => {
                if self.verbosity.allows(Verbosity::Profuse) {
                    trace!(peer = ?self.peer, bytes = n, offered = data.len(), "sent");
                }
                self.record_tx(&data[..n]);
                Ok(n)
            }
            Err(e) if is_retryable(&e) => Ok(0),
            Err(e) => {
                if is_peer_gone(&e) {
                    self.mark_cutoff();
                }
                if self.verbosity.allows(Verbosity::Terse) {
                    warn!(peer = ?self.peer, error = %e, "send failed");
                }
                Err(e.into())
            }
        }
    }

    /// Best-effort half or full shutdown; errors are swallowed.
    pub fn shutdown(&mut self, how: Shutdown) {
        if let Some(sock) = &self.sock {
            if let Err(e) = sock.shutdown(how) {
                if self.verbosity.allows(Verbosity::Verbose) {
                    debug!(peer = ?self.peer, error = %e, ?how, "shutdown ignored");
                }
            }
        }
    }

    /// Drop the socket and clear every connection flag.
    pub fn close(&mut self) {
        self.sock = None;
        self.accepted = false;
        self.connected = false;
        self.cutoff = false;
    }

    pub fn shutclose(&mut self) {
        self.shutdown(Shutdown::Both);
        self.close();
    }

    pub fn actual_buf_sizes(&self) -> (usize, usize) {
        sockopt::actual_buf_sizes(self.sock.as_ref())
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("local", &self.local)
            .field("peer", &self.peer)
            .field("accepted", &self.accepted)
            .field("connected", &self.connected)
            .field("cutoff", &self.cutoff)
            .field("queued", &self.txbs.len())
            .finish()
    }
}

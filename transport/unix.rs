// Unix-domain datagram transport addressed by filesystem path
use hio_buffer::TxQueue;
use hio_core::{is_retryable, Result, Verbosity};
use hio_wirelog::WireLog;
use nix::sys::stat::{umask, Mode};
use socket2::{Domain, SockAddr, Socket, Type};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, ErrorKind};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use tracing::{error, info, trace};

use crate::sockopt;
use crate::traits::Datagram;

pub struct Peer {
    ha: PathBuf,
    bs: usize,
    umask: Option<u32>,
    sock: Option<UnixDatagram>,
    txes: TxQueue<(Vec<u8>, PathBuf)>,
    rxes: VecDeque<(Vec<u8>, PathBuf)>,
    wlog: Option<WireLog>,
    verbosity: Verbosity,
}

impl Peer {
    pub fn new(ha: impl Into<PathBuf>, bs: usize) -> Self {
        Peer {
            ha: ha.into(),
            bs,
            umask: None,
            sock: None,
            txes: TxQueue::new(),
            rxes: VecDeque::new(),
            wlog: None,
            verbosity: Verbosity::Mute,
        }
    }

    /// Mode mask applied while creating a missing parent directory.
    pub fn with_umask(mut self, mask: u32) -> Self {
        self.umask = Some(mask);
        self
    }

    pub fn with_wirelog(mut self, wlog: WireLog) -> Self {
        self.wlog = Some(wlog);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn ha(&self) -> &Path {
        &self.ha
    }

    pub fn opened(&self) -> bool {
        self.sock.is_some()
    }

    pub fn rxes(&self) -> &VecDeque<(Vec<u8>, PathBuf)> {
        &self.rxes
    }

    fn make_parent(&self) -> io::Result<()> {
        let Some(parent) = self.ha.parent() else {
            return Ok(());
        };
        match self.umask {
            Some(mask) => {
                let old = umask(Mode::from_bits_truncate(mask as nix::libc::mode_t));
                let made = fs::create_dir_all(parent);
                umask(old);
                made
            }
            None => fs::create_dir_all(parent),
        }
    }

    fn try_open(&self) -> io::Result<UnixDatagram> {
        let sock = Socket::new(Domain::UNIX, Type::DGRAM, None)?;
        sock.set_reuse_address(true)?;
        sockopt::ensure_buf_sizes(&sock, self.bs)?;
        sock.set_nonblocking(true)?;
        let addr = SockAddr::unix(&self.ha)?;
        match sock.bind(&addr) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.make_parent()?;
                sock.bind(&addr)?;
            }
            Err(e) => return Err(e),
        }
        Ok(UnixDatagram::from(OwnedFd::from(sock)))
    }

    /// Create and bind the socket, creating the parent directory once if missing.
    pub fn open(&mut self) -> bool {
        if let Err(e) = self.close() {
            if self.verbosity.allows(Verbosity::Terse) {
                error!(ha = %self.ha.display(), error = %e, "uxd close failed");
            }
            return false;
        }
        match self.try_open() {
            Ok(sock) => {
                if let Some(path) = sock.local_addr().ok().and_then(|a| a.as_pathname().map(Path::to_path_buf)) {
                    self.ha = path;
                }
                self.sock = Some(sock);
                if self.verbosity.allows(Verbosity::Concise) {
                    info!(ha = %self.ha.display(), "uxd opened");
                }
                true
            }
            Err(e) => {
                if self.verbosity.allows(Verbosity::Terse) {
                    error!(ha = %self.ha.display(), error = %e, "uxd open failed");
                }
                false
            }
        }
    }

    pub fn reopen(&mut self) -> bool {
        self.open()
    }

    /// Close the socket and unlink its path. A path already gone is fine.
    pub fn close(&mut self) -> Result<()> {
        if self.sock.take().is_none() {
            return Ok(());
        }
        match fs::remove_file(&self.ha) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn actual_buf_sizes(&self) -> (usize, usize) {
        sockopt::actual_buf_sizes(self.sock.as_ref())
    }
}

impl Datagram for Peer {
    type Addr = PathBuf;

    fn send(&mut self, data: &[u8], dest: &PathBuf) -> Result<usize> {
        let Some(sock) = &self.sock else {
            return Ok(0);
        };
        match sock.send_to(data, dest) {
            Ok(n) => {
                if self.verbosity.allows(Verbosity::Profuse) {
                    trace!(ha = %self.ha.display(), dest = %dest.display(), bytes = n, "uxd sent");
                }
                if let Some(wlog) = &self.wlog {
                    wlog.write_tx(&dest.display(), &data[..n]);
                }
                Ok(n)
            }
            Err(e) if is_retryable(&e) => Ok(0),
            Err(e) => {
                if self.verbosity.allows(Verbosity::Terse) {
                    error!(ha = %self.ha.display(), dest = %dest.display(), error = %e, "uxd send failed");
                }
                Err(e.into())
            }
        }
    }

    fn receive(&mut self) -> Result<(Vec<u8>, Option<PathBuf>)> {
        let Some(sock) = &self.sock else {
            return Ok((Vec::new(), None));
        };
        let mut buf = vec![0u8; self.bs];
        match sock.recv_from(&mut buf) {
            Ok((n, src)) => {
                buf.truncate(n);
                // unbound senders have no path
                let src = src.as_pathname().map(Path::to_path_buf).unwrap_or_default();
                if self.verbosity.allows(Verbosity::Profuse) {
                    trace!(ha = %self.ha.display(), src = %src.display(), bytes = n, "uxd received");
                }
                if let Some(wlog) = &self.wlog {
                    wlog.write_rx(&src.display(), &buf);
                }
                Ok((buf, Some(src)))
            }
            Err(e) if is_retryable(&e) => Ok((Vec::new(), None)),
            Err(e) => {
                if self.verbosity.allows(Verbosity::Terse) {
                    error!(ha = %self.ha.display(), error = %e, "uxd receive failed");
                }
                Err(e.into())
            }
        }
    }

    fn txes_mut(&mut self) -> &mut TxQueue<(Vec<u8>, PathBuf)> {
        &mut self.txes
    }

    fn rxes_mut(&mut self) -> &mut VecDeque<(Vec<u8>, PathBuf)> {
        &mut self.rxes
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

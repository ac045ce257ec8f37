//! Error type shared by every hio crate, plus the one predicate that separates
//! transient "try again next tick" conditions from real failures.

use nix::errno::Errno;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Caller named a connection or endpoint that does not exist.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Fatal TLS failure (handshake or record layer).
    #[error("tls error: {0}")]
    Tls(String),

    /// The OS view of a socket disagrees with the transport's own bookkeeping.
    #[error("inconsistent socket state: {0}")]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the underlying cause is a transient would-block condition.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(e) => is_retryable(e),
            _ => false,
        }
    }
}

/// Classify an I/O error as transient.
///
/// Covers `EAGAIN`/`EWOULDBLOCK`, interrupted calls and the in-progress states
/// of a non-blocking `connect`. TLS want-read/want-write reach callers as
/// `WouldBlock` and are caught by the same test.
pub fn is_retryable(err: &io::Error) -> bool {
    if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
        return true;
    }
    match err.raw_os_error().map(Errno::from_raw) {
        Some(Errno::EAGAIN) | Some(Errno::EINPROGRESS) | Some(Errno::EALREADY) | Some(Errno::EINTR) => true,
        _ => false,
    }
}

/// Classify an I/O error as the peer having gone away underneath a send.
pub fn is_peer_gone(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_retryable() {
        assert!(is_retryable(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_retryable(&io::Error::from_raw_os_error(Errno::EINPROGRESS as i32)));
        assert!(is_retryable(&io::Error::from_raw_os_error(Errno::EALREADY as i32)));
        assert!(!is_retryable(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(!is_retryable(&io::Error::from_raw_os_error(Errno::EISCONN as i32)));
    }

    #[test]
    fn error_wrapper_keeps_classification() {
        let err = Error::from(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(err.is_retryable());
        assert!(!Error::InvalidAddress("x".into()).is_retryable());
    }

    #[test]
    fn broken_pipe_is_peer_gone() {
        assert!(is_peer_gone(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_peer_gone(&io::Error::from(io::ErrorKind::WouldBlock)));
    }
}

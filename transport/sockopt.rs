// Socket option helpers shared by every transport
use nix::sys::socket::{getsockopt, setsockopt, sockopt};
use std::io::Result;
use std::os::fd::AsFd;

/// Raise SO_SNDBUF/SO_RCVBUF to at least `size` when the OS default is smaller.
pub fn ensure_buf_sizes<F: AsFd>(fd: &F, size: usize) -> Result<()> {
    if getsockopt(fd, sockopt::SndBuf)? < size {
        setsockopt(fd, sockopt::SndBuf, &size)?;
    }
    if getsockopt(fd, sockopt::RcvBuf)? < size {
        setsockopt(fd, sockopt::RcvBuf, &size)?;
    }
    Ok(())
}

/// OS-negotiated (send, receive) buffer sizes, `(0, 0)` when unavailable.
pub fn actual_buf_sizes<F: AsFd>(fd: Option<&F>) -> (usize, usize) {
    match fd {
        Some(fd) => (
            getsockopt(fd, sockopt::SndBuf).unwrap_or(0),
            getsockopt(fd, sockopt::RcvBuf).unwrap_or(0),
        ),
        None => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    #[test]
    fn buffers_are_raised_to_requested_size() {
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        ensure_buf_sizes(&sock, 64 * 1024).unwrap();
        let (send, recv) = actual_buf_sizes(Some(&sock));
        assert!(send >= 64 * 1024);
        assert!(recv >= 64 * 1024);
    }

    #[test]
    fn unopened_socket_reports_zero() {
        assert_eq!(actual_buf_sizes::<UdpSocket>(None), (0, 0));
    }
}

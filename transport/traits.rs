// Transport abstractions - the service surface a poll loop drives once per tick
use hio_buffer::TxQueue;
use hio_core::Result;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::net::Shutdown;

use crate::link::Link;

/// Connection-oriented byte stream (plain or TLS, client or server side).
///
/// Implementors supply the raw `receive`/`send` pair; the transmit queue and
/// receive accumulator discipline is shared.
pub trait Transport {
    fn link(&self) -> &Link;
    fn link_mut(&mut self) -> &mut Link;

    /// One non-blocking read: `None` when nothing is available, an empty
    /// vector once the peer has closed (and `cutoff` is set).
    fn receive(&mut self) -> Result<Option<Vec<u8>>>;

    /// One non-blocking write returning the bytes taken, `0` on would-block.
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Push out bytes already accepted by a layered transport.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn accepted(&self) -> bool {
        self.link().accepted()
    }

    fn connected(&self) -> bool {
        self.link().connected()
    }

    fn cutoff(&self) -> bool {
        self.link().cutoff()
    }

    /// Queue `data` for transmission by [`service_txes`](Self::service_txes).
    fn tx(&mut self, data: &[u8]) {
        self.link_mut().txbs_mut().push(data.to_vec());
    }

    /// Send queued buffers in order until the queue drains or a send is partial.
    fn service_txes(&mut self) -> Result<()> {
        if !self.connected() || self.cutoff() {
            return Ok(());
        }
        self.flush()?;
        while self.connected() && !self.cutoff() {
            let Some(data) = self.link_mut().txbs_mut().pop() else {
                break;
            };
            let sent = self.send(&data)?;
            if sent < data.len() {
                self.link_mut().txbs_mut().requeue_unsent(data, sent);
                break;
            }
        }
        Ok(())
    }

    /// Receive until nothing is available or the peer closes.
    fn service_receives(&mut self) -> Result<()> {
        while !self.cutoff() {
            match self.receive()? {
                Some(data) if !data.is_empty() => self.link_mut().rx_mut().push(data),
                _ => break,
            }
        }
        Ok(())
    }

    /// Move discrete received buffers into the contiguous `rxbs`.
    fn service_rxes(&mut self) -> usize {
        self.link_mut().rx_mut().service_rxes()
    }

    /// Receive everything available, then fold it into `rxbs`.
    fn service_all_rx(&mut self) -> Result<usize> {
        self.service_receives()?;
        Ok(self.service_rxes())
    }

    fn cat_rxes(&mut self) -> Vec<u8> {
        self.link_mut().rx_mut().cat_rxes()
    }

    fn clear_rxbs(&mut self) {
        self.link_mut().rx_mut().clear_rxbs();
    }

    fn tail_rxbs(&self, index: usize) -> (&[u8], usize) {
        self.link().rx().tail_rxbs(index)
    }

    fn rxbs(&self) -> &[u8] {
        self.link().rx().rxbs()
    }

    fn shutdown(&mut self, how: Shutdown) {
        self.link_mut().shutdown(how);
    }

    fn shutdown_send(&mut self) {
        self.shutdown(Shutdown::Write);
    }

    fn shutdown_receive(&mut self) {
        self.shutdown(Shutdown::Read);
    }

    /// Shut down both directions, close the socket, clear accepted/connected.
    fn shutclose(&mut self) {
        self.link_mut().shutclose();
    }

    fn actual_buf_sizes(&self) -> (usize, usize) {
        self.link().actual_buf_sizes()
    }
}

/// Connectionless transport addressed per datagram.
pub trait Datagram {
    type Addr: Clone + Debug;

    /// One non-blocking `sendto`; `0` on would-block.
    fn send(&mut self, data: &[u8], dest: &Self::Addr) -> Result<usize>;

    /// One non-blocking `recvfrom`; `(empty, None)` when nothing is waiting.
    fn receive(&mut self) -> Result<(Vec<u8>, Option<Self::Addr>)>;

    fn txes_mut(&mut self) -> &mut TxQueue<(Vec<u8>, Self::Addr)>;
    fn rxes_mut(&mut self) -> &mut VecDeque<(Vec<u8>, Self::Addr)>;

    fn tx(&mut self, data: &[u8], dest: Self::Addr) {
        self.txes_mut().push((data.to_vec(), dest));
    }

    /// Send queued datagrams in order; stop at the first would-block.
    fn service_txes(&mut self) -> Result<()> {
        while let Some((data, dest)) = self.txes_mut().pop() {
            let sent = self.send(&data, &dest)?;
            if sent == 0 && !data.is_empty() {
                self.txes_mut().push_front((data, dest));
                break;
            }
        }
        Ok(())
    }

    /// Receive datagrams until none are waiting.
    fn service_receives(&mut self) -> Result<()> {
        loop {
            let (data, src) = self.receive()?;
            match src {
                Some(src) => self.rxes_mut().push_back((data, src)),
                None => break,
            }
        }
        Ok(())
    }
}

// Receive accumulator: discrete arrivals (rxes) plus one contiguous buffer (rxbs)
use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct RxAccumulator {
    rxes: VecDeque<Vec<u8>>,
    rxbs: Vec<u8>,
}

impl RxAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one received buffer, keeping its arrival boundary.
    pub fn push(&mut self, data: Vec<u8>) {
        self.rxes.push_back(data);
    }

    pub fn rxes(&self) -> &VecDeque<Vec<u8>> {
        &self.rxes
    }

    pub fn pop_rx(&mut self) -> Option<Vec<u8>> {
        self.rxes.pop_front()
    }

    /// Move every discrete buffer onto the end of `rxbs`. Returns bytes moved.
    pub fn service_rxes(&mut self) -> usize {
        let mut moved = 0;
        while let Some(data) = self.rxes.pop_front() {
            moved += data.len();
            self.rxbs.extend_from_slice(&data);
        }
        moved
    }

    /// Concatenate and clear the discrete buffers.
    pub fn cat_rxes(&mut self) -> Vec<u8> {
        let total = self.rxes.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for data in self.rxes.drain(..) {
            out.extend_from_slice(&data);
        }
        out
    }

    pub fn rxbs(&self) -> &[u8] {
        &self.rxbs
    }

    pub fn take_rxbs(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.rxbs)
    }

    pub fn clear_rxbs(&mut self) {
        self.rxbs.clear();
    }

    /// Bytes of `rxbs` from `index` on, plus the current total length.
    ///
    /// A parser passes back the returned length as the next `index` so it only
    /// ever sees bytes it has not scanned yet.
    pub fn tail_rxbs(&self, index: usize) -> (&[u8], usize) {
        let start = index.min(self.rxbs.len());
        (&self.rxbs[start..], self.rxbs.len())
    }

    pub fn clear(&mut self) {
        self.rxes.clear();
        self.rxbs.clear();
    }
}

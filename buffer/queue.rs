// Transmit queue: FIFO of pending buffers, unsent remainders go back to the front
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct TxQueue<T = Vec<u8>> {
    items: VecDeque<T>,
}

impl<T> TxQueue<T> {
    pub fn new() -> Self {
        TxQueue { items: VecDeque::new() }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Put an item back at the head so it is sent before anything queued later.
    pub fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl TxQueue<Vec<u8>> {
    /// Re-queue whatever part of `item` a partial send did not write.
    pub fn requeue_unsent(&mut self, mut item: Vec<u8>, sent: usize) {
        if sent >= item.len() {
            return;
        }
        item.drain(..sent);
        self.items.push_front(item);
    }

    /// Total number of bytes still waiting to go out.
    pub fn pending_bytes(&self) -> usize {
        self.items.iter().map(Vec::len).sum()
    }
}

impl<T> Default for TxQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = TxQueue::new();
        q.push(b"one".to_vec());
        q.push(b"two".to_vec());
        assert_eq!(q.pop().unwrap(), b"one");
        assert_eq!(q.pop().unwrap(), b"two");
        assert!(q.pop().is_none());
    }

    #[test]
    fn unsent_remainder_goes_to_front() {
        let mut q = TxQueue::new();
        q.push(b"abcdef".to_vec());
        q.push(b"ghi".to_vec());

        let head = q.pop().unwrap();
        q.requeue_unsent(head, 4);
        assert_eq!(q.pending_bytes(), 5);

        let mut out = Vec::new();
        while let Some(item) = q.pop() {
            out.extend_from_slice(&item);
        }
        assert_eq!(out, b"efghi");
    }

    #[test]
    fn fully_sent_item_is_not_requeued() {
        let mut q = TxQueue::new();
        q.requeue_unsent(b"abc".to_vec(), 3);
        assert!(q.is_empty());
    }
}

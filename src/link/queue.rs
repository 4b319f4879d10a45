//! Bounded per-connection transmit FIFO.
//!
//! Application payloads wait here, together with the timestamp at which the traffic
//! source produced them, until the connection state machine drains them into PDUs. The
//! queue is bounded; a full queue rejects the payload and the caller records a queue
//! overflow in the connection statistics.

use crate::time::Instant;
use heapless::Deque;

/// Number of payloads a connection can buffer.
pub const QUEUE_CAPACITY: usize = 32;

/// An application payload waiting for transmission.
#[derive(Clone, Debug)]
pub struct QueuedPayload {
    pub data: heapless::Vec<u8, { crate::link::data::MAX_PAYLOAD }>,
    /// When the traffic source produced the payload; carried through the air so the
    /// receiver can compute end-to-end latency.
    pub produced_at: Instant,
}

/// Bounded FIFO of application payloads, owned by exactly one connection.
pub struct TxQueue {
    inner: Deque<QueuedPayload, QUEUE_CAPACITY>,
}

impl TxQueue {
    pub fn new() -> Self {
        Self {
            inner: Deque::new(),
        }
    }

    /// Appends a payload. Returns `false` (leaving the queue unchanged) when the queue is
    /// full or the payload exceeds the PDU payload limit.
    pub fn enqueue(&mut self, data: &[u8], produced_at: Instant) -> bool {
        let data = match heapless::Vec::from_slice(data) {
            Ok(v) => v,
            Err(()) => return false,
        };
        self.inner
            .push_back(QueuedPayload { data, produced_at })
            .is_ok()
    }

    /// Removes and returns the oldest payload.
    pub fn dequeue(&mut self) -> Option<QueuedPayload> {
        self.inner.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl Default for TxQueue {
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
        assert!(q.enqueue(b"one", Instant::from_micros(1)));
        assert!(q.enqueue(b"two", Instant::from_micros(2)));
        assert_eq!(q.len(), 2);

        let first = q.dequeue().unwrap();
        assert_eq!(&first.data[..], b"one");
        assert_eq!(first.produced_at, Instant::from_micros(1));
        assert_eq!(&q.dequeue().unwrap().data[..], b"two");
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn rejects_when_full() {
        let mut q = TxQueue::new();
        for i in 0..QUEUE_CAPACITY {
            assert!(q.enqueue(&[i as u8], Instant::ZERO), "enqueue {}", i);
        }
        assert!(!q.enqueue(b"overflow", Instant::ZERO));
        assert_eq!(q.len(), QUEUE_CAPACITY);
        q.dequeue();
        assert!(q.enqueue(b"fits again", Instant::ZERO));
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut q = TxQueue::new();
        let big = vec![0u8; crate::link::data::MAX_PAYLOAD + 1];
        assert!(!q.enqueue(&big, Instant::ZERO));
        assert!(q.is_empty());
    }
}

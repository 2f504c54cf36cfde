//! Bounded frame queue between a pipeline's terminal writer and a downmix slot.
//!
//! Single writer, single reader by construction. Both halves are held here so
//! the buffer survives pipeline reruns and can be drained on reset.

use crate::element::AudioFrame;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RingBuffer {
    tx: Sender<AudioFrame>,
    rx: Receiver<AudioFrame>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    pub fn writer(&self) -> Sender<AudioFrame> {
        self.tx.clone()
    }

    /// Reads one frame, waiting at most `timeout`. Zero never blocks.
    pub fn read(&self, timeout: Duration) -> Option<AudioFrame> {
        if timeout.is_zero() {
            self.rx.try_recv().ok()
        } else {
            self.rx.recv_timeout(timeout).ok()
        }
    }

    /// Discards everything queued. Returns how many frames were dropped.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True if both handles refer to the same underlying buffer.
    pub fn same_buffer(&self, other: &RingBuffer) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

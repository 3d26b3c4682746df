//! Offline operation queue.
//!
//! Requests issued while the session has no live connection are parked here
//! and flushed in submission order once a connection is (re)established.
//! The queue is generic over the completion token the caller attaches to each
//! request so that evicted entries can still be failed back to their callers.

use crate::packet::Packet;
use std::collections::VecDeque;

/// One deferred request with its caller-side completion token.
#[derive(Debug)]
pub struct QueuedRequest<T> {
    pub packet: Packet,
    pub token: T,
}

#[derive(Debug)]
pub struct OutgoingQueue<T> {
    queue: VecDeque<QueuedRequest<T>>,
    max_entries: Option<usize>,
}

impl<T> OutgoingQueue<T> {
    /// Unbounded queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            max_entries: None,
        }
    }

    /// Queue that evicts its oldest entry once `max_entries` is exceeded.
    #[must_use]
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max_entries: Some(max_entries),
        }
    }

    /// Parks a request. Returns the evicted oldest entry when the bound is
    /// hit, so the caller can fail its token.
    pub fn enqueue(&mut self, packet: Packet, token: T) -> Option<QueuedRequest<T>> {
        let evicted = match self.max_entries {
            Some(max) if self.queue.len() >= max => self.queue.pop_front(),
            _ => None,
        };
        self.queue.push_back(QueuedRequest { packet, token });
        evicted
    }

    #[must_use]
    pub fn dequeue(&mut self) -> Option<QueuedRequest<T>> {
        self.queue.pop_front()
    }

    /// Removes the queued request carrying `message_id`, if any.
    pub fn remove(&mut self, message_id: u16) -> Option<QueuedRequest<T>> {
        let idx = self
            .queue
            .iter()
            .position(|r| r.packet.message_id() == Some(message_id))?;
        self.queue.remove(idx)
    }

    /// Empties the queue, handing back every parked request in order.
    pub fn drain(&mut self) -> Vec<QueuedRequest<T>> {
        self.queue.drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> Default for OutgoingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

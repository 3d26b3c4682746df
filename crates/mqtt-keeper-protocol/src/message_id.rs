//! 16-bit message identifier allocation.
//!
//! Ids cycle through 1..=65535, never 0, starting from a random seed so that
//! two sessions created back to back are unlikely to collide on the broker
//! side. An id stays reserved until its owning operation completes; the
//! reconnect replay path re-registers ids recovered from the store so they
//! are not handed out again while still outstanding.

use crate::error::{MqttError, Result};
use rand::Rng;
use std::collections::HashSet;

#[derive(Debug)]
pub struct MessageIdAllocator {
    next: u16,
    in_use: HashSet<u16>,
}

impl MessageIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        let seed = rand::thread_rng().gen_range(1..=u16::MAX);
        Self::with_seed(seed)
    }

    /// Deterministic seed, used by replay logic and tests.
    #[must_use]
    pub fn with_seed(seed: u16) -> Self {
        Self {
            next: seed.max(1),
            in_use: HashSet::new(),
        }
    }

    /// Returns the next free id, wrapping 65535 -> 1.
    ///
    /// # Errors
    /// Returns `MessageIdExhausted` when all 65535 ids are outstanding.
    pub fn allocate(&mut self) -> Result<u16> {
        if self.in_use.len() >= usize::from(u16::MAX) {
            return Err(MqttError::MessageIdExhausted);
        }

        loop {
            let id = self.next;
            self.next = if self.next == u16::MAX { 1 } else { self.next + 1 };
            if self.in_use.insert(id) {
                return Ok(id);
            }
        }
    }

    /// The most recently issued id, before any wraparound bookkeeping.
    #[must_use]
    pub fn last_allocated(&self) -> u16 {
        if self.next == 1 {
            u16::MAX
        } else {
            self.next - 1
        }
    }

    /// Reserves a specific id (replaying persisted in-flight entries).
    /// Returns false if the id is already outstanding.
    pub fn register(&mut self, id: u16) -> bool {
        if id == 0 {
            return false;
        }
        self.in_use.insert(id)
    }

    /// Frees an id for reuse once its operation completed.
    pub fn deallocate(&mut self, id: u16) {
        self.in_use.remove(&id);
    }

    /// Number of currently outstanding ids.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.in_use.len()
    }

    /// Drops every reservation.
    pub fn clear(&mut self) {
        self.in_use.clear();
    }
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_from_seed() {
        let mut alloc = MessageIdAllocator::with_seed(42);
        assert_eq!(alloc.allocate().unwrap(), 42);
        assert_eq!(alloc.allocate().unwrap(), 43);
        assert_eq!(alloc.last_allocated(), 43);
    }

    #[test]
    fn never_issues_zero_on_wraparound() {
        let mut alloc = MessageIdAllocator::with_seed(u16::MAX);
        assert_eq!(alloc.allocate().unwrap(), u16::MAX);
        assert_eq!(alloc.allocate().unwrap(), 1);
        assert_eq!(alloc.allocate().unwrap(), 2);
    }

    #[test]
    fn full_cycle_without_repeats() {
        let mut alloc = MessageIdAllocator::with_seed(u16::MAX);
        let mut seen = HashSet::new();
        for _ in 0..usize::from(u16::MAX) {
            let id = alloc.allocate().unwrap();
            assert_ne!(id, 0);
            assert!(seen.insert(id), "id {id} repeated while outstanding");
        }
        assert!(matches!(
            alloc.allocate(),
            Err(MqttError::MessageIdExhausted)
        ));
    }

    #[test]
    fn skips_registered_ids() {
        let mut alloc = MessageIdAllocator::with_seed(10);
        assert!(alloc.register(11));
        assert!(!alloc.register(11));
        assert_eq!(alloc.allocate().unwrap(), 10);
        // 11 is reserved, allocation steps over it
        assert_eq!(alloc.allocate().unwrap(), 12);
    }

    #[test]
    fn deallocate_frees_for_reuse() {
        let mut alloc = MessageIdAllocator::with_seed(5);
        let id = alloc.allocate().unwrap();
        assert_eq!(alloc.outstanding(), 1);
        alloc.deallocate(id);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn register_rejects_zero() {
        let mut alloc = MessageIdAllocator::with_seed(1);
        assert!(!alloc.register(0));
    }

    #[test]
    fn clear_resets_reservations() {
        let mut alloc = MessageIdAllocator::with_seed(1);
        alloc.allocate().unwrap();
        alloc.allocate().unwrap();
        alloc.clear();
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn random_seed_in_range() {
        for _ in 0..64 {
            let alloc = MessageIdAllocator::new();
            assert!(alloc.next >= 1);
        }
    }
}

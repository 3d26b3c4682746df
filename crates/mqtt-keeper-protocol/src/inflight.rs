//! In-flight handshake registries.
//!
//! The outgoing side tracks every acknowledged operation this client started
//! (publish, subscribe, unsubscribe) until its terminal ack arrives. The
//! incoming side tracks QoS 2 publishes received from the broker until their
//! PUBREL lands. Replay ordering is the store's concern; these registries
//! only answer "what is id N waiting on".

use crate::packet::Packet;
use std::collections::HashMap;

/// Which acknowledgment an outgoing operation is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingPhase {
    AwaitingPuback,
    AwaitingPubrec,
    AwaitingPubcomp,
    AwaitingSuback,
    AwaitingUnsuback,
}

#[derive(Debug, Clone)]
pub struct OutgoingEntry {
    pub message_id: u16,
    pub packet: Packet,
    pub phase: OutgoingPhase,
}

#[derive(Debug, Default)]
pub struct OutgoingInflight {
    entries: HashMap<u16, OutgoingEntry>,
}

impl OutgoingInflight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, message_id: u16, packet: Packet, phase: OutgoingPhase) {
        self.entries.insert(
            message_id,
            OutgoingEntry {
                message_id,
                packet,
                phase,
            },
        );
    }

    #[must_use]
    pub fn contains(&self, message_id: u16) -> bool {
        self.entries.contains_key(&message_id)
    }

    #[must_use]
    pub fn phase(&self, message_id: u16) -> Option<OutgoingPhase> {
        self.entries.get(&message_id).map(|e| e.phase)
    }

    /// Advances an entry to its next phase, replacing the packet that will be
    /// resent if the connection drops (a QoS 2 publish becomes its PUBREL).
    pub fn advance(&mut self, message_id: u16, packet: Packet, phase: OutgoingPhase) -> bool {
        match self.entries.get_mut(&message_id) {
            Some(entry) => {
                entry.packet = packet;
                entry.phase = phase;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, message_id: u16) -> Option<OutgoingEntry> {
        self.entries.remove(&message_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Where an incoming QoS 2 publish stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingPhase {
    /// The application handler has not accepted the message yet; a duplicate
    /// PUBLISH may retry delivery.
    AwaitingDelivery,
    /// Delivered; holding the id against duplicates until PUBREL.
    AwaitingPubrel,
}

#[derive(Debug, Default)]
pub struct IncomingInflight {
    entries: HashMap<u16, IncomingPhase>,
}

impl IncomingInflight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, message_id: u16, phase: IncomingPhase) {
        self.entries.insert(message_id, phase);
    }

    #[must_use]
    pub fn phase(&self, message_id: u16) -> Option<IncomingPhase> {
        self.entries.get(&message_id).copied()
    }

    #[must_use]
    pub fn contains(&self, message_id: u16) -> bool {
        self.entries.contains_key(&message_id)
    }

    pub fn remove(&mut self, message_id: u16) -> Option<IncomingPhase> {
        self.entries.remove(&message_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

//! Persistent store capability for in-flight packets.
//!
//! Two independent store instances back a session: the outgoing store holds
//! publishes, PUBREL markers, subscribes, and unsubscribes awaiting their
//! final acknowledgment; the incoming store holds QoS 2 publishes whose
//! exactly-once handshake has not resolved. The storage engine behind the
//! trait is the caller's concern; `MemoryStore` is the ephemeral default used
//! for clean sessions.

use crate::error::{MqttError, Result};
use crate::packet::Packet;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// One persisted in-flight record, keyed by its message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPacket {
    pub message_id: u16,
    pub packet: Packet,
    /// For incoming QoS 2 records: whether the application handler has
    /// already been invoked successfully. Replayed entries with this flag
    /// set resume the handshake without redelivering the message.
    pub delivered: bool,
}

impl StoredPacket {
    #[must_use]
    pub fn new(message_id: u16, packet: Packet) -> Self {
        Self {
            message_id,
            packet,
            delivered: false,
        }
    }

    #[must_use]
    pub fn delivered(message_id: u16, packet: Packet) -> Self {
        Self {
            message_id,
            packet,
            delivered: true,
        }
    }
}

/// Durable ledger of in-flight packets.
///
/// `put`/`get`/`del` report I/O failure through their returned future and
/// never panic on it. The id snapshot and count are synchronous so flow
/// control and tests can observe the ledger without awaiting.
pub trait SessionStore: Send + Sync {
    fn put(&self, record: StoredPacket) -> StoreFuture<'_, ()>;

    fn get(&self, message_id: u16) -> StoreFuture<'_, Option<StoredPacket>>;

    fn del(&self, message_id: u16) -> StoreFuture<'_, Option<StoredPacket>>;

    /// Currently stored ids in insertion order.
    fn ids(&self) -> Vec<u16>;

    fn size(&self) -> usize;

    /// Flushes and releases resources. Later operations fail with
    /// `StoreClosed`.
    fn close(&self) -> StoreFuture<'_, ()>;
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    entries: Vec<StoredPacket>,
    closed: bool,
}

/// In-memory `SessionStore`, discarded with the session.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn put(&self, record: StoredPacket) -> StoreFuture<'_, ()> {
        let result = {
            let mut inner = self.inner.lock();
            if inner.closed {
                Err(MqttError::StoreClosed)
            } else {
                // replace in place so replay keeps the original submission order
                match inner
                    .entries
                    .iter_mut()
                    .find(|e| e.message_id == record.message_id)
                {
                    Some(existing) => *existing = record,
                    None => inner.entries.push(record),
                }
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn get(&self, message_id: u16) -> StoreFuture<'_, Option<StoredPacket>> {
        let result = {
            let inner = self.inner.lock();
            if inner.closed {
                Err(MqttError::StoreClosed)
            } else {
                Ok(inner
                    .entries
                    .iter()
                    .find(|e| e.message_id == message_id)
                    .cloned())
            }
        };
        Box::pin(async move { result })
    }

    fn del(&self, message_id: u16) -> StoreFuture<'_, Option<StoredPacket>> {
        let result = {
            let mut inner = self.inner.lock();
            if inner.closed {
                Err(MqttError::StoreClosed)
            } else {
                let found = inner.entries.iter().position(|e| e.message_id == message_id);
                Ok(found.map(|idx| inner.entries.remove(idx)))
            }
        };
        Box::pin(async move { result })
    }

    fn ids(&self) -> Vec<u16> {
        self.inner.lock().entries.iter().map(|e| e.message_id).collect()
    }

    fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn close(&self) -> StoreFuture<'_, ()> {
        self.inner.lock().closed = true;
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PubRelPacket, PublishPacket};
    use crate::types::QoS;
    use bytes::Bytes;

    fn publish(id: u16, qos: QoS) -> Packet {
        Packet::Publish(PublishPacket {
            topic: format!("t/{id}"),
            payload: Bytes::from_static(b"payload"),
            qos,
            retain: false,
            dup: false,
            message_id: Some(id),
        })
    }

    #[test]
    fn put_get_del_roundtrip() {
        let store = MemoryStore::new();
        let record = StoredPacket::new(1, publish(1, QoS::AtLeastOnce));

        futures::executor::block_on(store.put(record.clone())).unwrap();
        assert_eq!(store.size(), 1);

        let got = futures::executor::block_on(store.get(1)).unwrap();
        assert_eq!(got, Some(record.clone()));

        let removed = futures::executor::block_on(store.del(1)).unwrap();
        assert_eq!(removed, Some(record));
        assert_eq!(store.size(), 0);
        assert_eq!(futures::executor::block_on(store.get(1)).unwrap(), None);
    }

    #[test]
    fn ids_keep_insertion_order() {
        let store = MemoryStore::new();
        for id in [5u16, 2, 9] {
            futures::executor::block_on(store.put(StoredPacket::new(id, publish(id, QoS::AtLeastOnce))))
                .unwrap();
        }
        assert_eq!(store.ids(), vec![5, 2, 9]);
    }

    #[test]
    fn replace_keeps_position() {
        let store = MemoryStore::new();
        for id in [3u16, 7] {
            futures::executor::block_on(store.put(StoredPacket::new(id, publish(id, QoS::ExactlyOnce))))
                .unwrap();
        }
        // QoS 2 handshake swaps the publish for a PUBREL marker
        futures::executor::block_on(store.put(StoredPacket::new(
            3,
            Packet::PubRel(PubRelPacket { message_id: 3 }),
        )))
        .unwrap();

        assert_eq!(store.ids(), vec![3, 7]);
        let got = futures::executor::block_on(store.get(3)).unwrap().unwrap();
        assert_eq!(got.packet, Packet::PubRel(PubRelPacket { message_id: 3 }));
    }

    #[test]
    fn closed_store_rejects_operations() {
        let store = MemoryStore::new();
        futures::executor::block_on(store.close()).unwrap();

        let err = futures::executor::block_on(store.put(StoredPacket::new(1, publish(1, QoS::AtLeastOnce))));
        assert!(matches!(err, Err(MqttError::StoreClosed)));
        assert!(matches!(
            futures::executor::block_on(store.get(1)),
            Err(MqttError::StoreClosed)
        ));
        assert!(matches!(
            futures::executor::block_on(store.del(1)),
            Err(MqttError::StoreClosed)
        ));
    }

    #[test]
    fn del_missing_is_none() {
        let store = MemoryStore::new();
        assert_eq!(futures::executor::block_on(store.del(99)).unwrap(), None);
    }
}

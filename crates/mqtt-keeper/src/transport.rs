//! Packet-level transport seam.
//!
//! The session moves structured packets; framing, sockets, and TLS live
//! behind these traits. `recv` returning `Ok(None)` is an orderly peer close.
//! The in-memory implementation backs the integration tests: every
//! `MemoryConnector::connect` yields a fresh link whose broker side pops out
//! of a channel, so a test can play broker across reconnects.

use futures::future::BoxFuture;
use mqtt_keeper_protocol::packet::Packet;
use mqtt_keeper_protocol::{MqttError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub trait PacketSink: Send {
    fn send(&mut self, packet: Packet) -> BoxFuture<'_, Result<()>>;

    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

pub trait PacketStream: Send {
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Packet>>>;
}

/// Opens a fresh transport per connection attempt.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<(Box<dyn PacketSink>, Box<dyn PacketStream>)>>;
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Packet>>,
}

impl PacketSink for MemorySink {
    fn send(&mut self, packet: Packet) -> BoxFuture<'_, Result<()>> {
        let result = match &self.tx {
            Some(tx) => tx
                .send(packet)
                .map_err(|_| MqttError::ConnectionError("transport closed".into())),
            None => Err(MqttError::ConnectionError("transport closed".into())),
        };
        Box::pin(async move { result })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.tx = None;
        Box::pin(async { Ok(()) })
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Packet>,
}

impl PacketStream for MemoryStream {
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Packet>>> {
        Box::pin(async move { Ok(self.rx.recv().await) })
    }
}

/// Test-side handle to one in-memory connection.
#[derive(Debug)]
pub struct BrokerLink {
    from_client: mpsc::UnboundedReceiver<Packet>,
    to_client: Option<mpsc::UnboundedSender<Packet>>,
}

impl BrokerLink {
    /// Next packet written by the client, `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.from_client.recv().await
    }

    /// Pushes a packet to the client. Returns false if the client side is
    /// gone.
    pub fn send(&self, packet: Packet) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(packet).is_ok(),
            None => false,
        }
    }

    /// Simulates the broker dropping the connection.
    pub fn close(&mut self) {
        self.to_client = None;
    }
}

/// One in-memory client/broker transport pair.
#[must_use]
pub fn memory_pair() -> (Box<dyn PacketSink>, Box<dyn PacketStream>, BrokerLink) {
    let (client_tx, broker_rx) = mpsc::unbounded_channel();
    let (broker_tx, client_rx) = mpsc::unbounded_channel();
    (
        Box::new(MemorySink {
            tx: Some(client_tx),
        }),
        Box::new(MemoryStream { rx: client_rx }),
        BrokerLink {
            from_client: broker_rx,
            to_client: Some(broker_tx),
        },
    )
}

/// In-memory [`Connector`]. Each successful connect pushes the broker side
/// of the new link onto the channel returned by [`MemoryConnector::new`].
pub struct MemoryConnector {
    links: mpsc::UnboundedSender<BrokerLink>,
    refuse: AtomicBool,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BrokerLink>) {
        let (links, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                links,
                refuse: AtomicBool::new(false),
            }),
            rx,
        )
    }

    /// While set, connect attempts fail as if the broker were unreachable.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> BoxFuture<'_, Result<(Box<dyn PacketSink>, Box<dyn PacketStream>)>> {
        Box::pin(async move {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(MqttError::ConnectionError("connection refused".into()));
            }
            let (sink, stream, link) = memory_pair();
            self.links
                .send(link)
                .map_err(|_| MqttError::ConnectionError("connection refused".into()))?;
            Ok((sink, stream))
        })
    }
}

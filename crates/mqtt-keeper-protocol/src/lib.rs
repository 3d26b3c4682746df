//! Sans-io session state for a resilient MQTT client.
//!
//! This crate holds everything about a client session that can be expressed
//! without touching a socket or a clock: the structured packet model, the
//! QoS 1/2 handshake transition functions, message-identifier allocation,
//! topic-filter validation, the connection state machine, keepalive timing
//! math, the persistent-store capability (with an in-memory default), the
//! offline operation queue, and the resubscribe tracker.
//!
//! The companion `mqtt-keeper` crate drives this state from tokio tasks and
//! a packet-level transport.

pub mod connection;
pub mod error;
pub mod inflight;
pub mod keepalive;
pub mod message_id;
pub mod packet;
pub mod qos;
pub mod queue;
pub mod resubscribe;
pub mod store;
pub mod topic;
pub mod types;

pub use connection::{
    ConnectionEvent, ConnectionMachine, ConnectionState, DisconnectReason, ReconnectConfig,
};
pub use error::{MqttError, Result};
pub use inflight::{IncomingInflight, IncomingPhase, OutgoingEntry, OutgoingInflight, OutgoingPhase};
pub use keepalive::{KeepaliveAction, KeepaliveConfig, KeepaliveTracker};
pub use message_id::MessageIdAllocator;
pub use packet::{
    ConnAckPacket, ConnectPacket, ConnectReturnCode, Packet, PublishPacket, ReasonCode,
    SubAckPacket, SubscribeFilter, SubscribePacket, UnsubAckPacket, UnsubscribePacket,
};
pub use qos::QosAction;
pub use queue::OutgoingQueue;
pub use resubscribe::ResubscribeTracker;
pub use store::{MemoryStore, SessionStore, StoreFuture, StoredPacket};
pub use types::{ProtocolVersion, QoS};

//! Tokio runtime for the `mqtt-keeper-protocol` session state.
//!
//! The [`Session`] handle exposes the operation surface (`publish`,
//! `subscribe`, `unsubscribe`, `remove_outgoing_message`, `end`,
//! `reconnect`); a background connection task owns the transport, drives
//! reconnection with offline queueing, replays persisted in-flight work, and
//! polices the keepalive ping. Transports are injected through the
//! packet-level [`transport`] traits; an in-memory pair backs the test suite.

pub mod client;
pub mod events;
pub mod options;
pub mod transport;

pub(crate) mod connection;
pub(crate) mod session;

pub use client::{Session, SessionStores};
pub use events::{Message, MessageHandler, SessionEvent, SessionEvents};
pub use options::{PublishOptions, SessionOptions, StorePutHook};
pub use transport::{BrokerLink, Connector, MemoryConnector, PacketSink, PacketStream};

pub use mqtt_keeper_protocol::packet;
pub use mqtt_keeper_protocol::packet::{Packet, SubAckCode};
pub use mqtt_keeper_protocol::{
    ConnectionState, KeepaliveConfig, MemoryStore, MqttError, ProtocolVersion, QoS,
    ReconnectConfig, Result, SessionStore, SubscribeFilter,
};

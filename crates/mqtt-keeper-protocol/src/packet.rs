//! Structured packet objects.
//!
//! The byte-level grammar is an external collaborator: transports encode and
//! decode these structures however they frame them. The session core only ever
//! sees the structured form. Packets derive `serde` traits so durable store
//! adapters can persist in-flight records.

use crate::types::{ProtocolVersion, QoS};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// CONNECT return code (the v3.1.1 set; v5 reason codes map onto the same
/// failure classes for the client's purposes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
}

impl ConnectReturnCode {
    #[must_use]
    pub fn is_accepted(self) -> bool {
        self == ConnectReturnCode::Accepted
    }
}

/// Acknowledgment reason code carried on PUBACK/PUBREC/PUBCOMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    Success,
    NoMatchingSubscribers,
    UnspecifiedError,
    ImplementationSpecificError,
    NotAuthorized,
    TopicNameInvalid,
    PacketIdentifierInUse,
    PacketIdentifierNotFound,
    QuotaExceeded,
    PayloadFormatInvalid,
}

impl Default for ReasonCode {
    fn default() -> Self {
        ReasonCode::Success
    }
}

impl ReasonCode {
    #[must_use]
    pub fn is_error(self) -> bool {
        !matches!(self, ReasonCode::Success | ReasonCode::NoMatchingSubscribers)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPacket {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive_secs: u16,
    pub protocol_version: ProtocolVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPacket {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present for QoS 1/2, absent for QoS 0.
    pub message_id: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubAckPacket {
    pub message_id: u16,
    pub reason: ReasonCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubRecPacket {
    pub message_id: u16,
    pub reason: ReasonCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubRelPacket {
    pub message_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubCompPacket {
    pub message_id: u16,
    pub reason: ReasonCode,
}

/// One topic filter with its requested subscription options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeFilter {
    pub filter: String,
    pub qos: QoS,
}

impl SubscribeFilter {
    #[must_use]
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePacket {
    pub message_id: u16,
    pub filters: Vec<SubscribeFilter>,
}

/// Per-filter grant: the granted QoS, or 0x80 for a rejected filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubAckCode {
    Granted(QoS),
    Failure,
}

impl SubAckCode {
    #[must_use]
    pub fn granted_qos(self) -> Option<QoS> {
        match self {
            SubAckCode::Granted(qos) => Some(qos),
            SubAckCode::Failure => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAckPacket {
    pub message_id: u16,
    pub grants: Vec<SubAckCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribePacket {
    pub message_id: u16,
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubAckPacket {
    pub message_id: u16,
}

/// A structured MQTT control packet as seen by the session core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Message id for packets that carry one.
    #[must_use]
    pub fn message_id(&self) -> Option<u16> {
        match self {
            Packet::Publish(p) => p.message_id,
            Packet::PubAck(p) => Some(p.message_id),
            Packet::PubRec(p) => Some(p.message_id),
            Packet::PubRel(p) => Some(p.message_id),
            Packet::PubComp(p) => Some(p.message_id),
            Packet::Subscribe(p) => Some(p.message_id),
            Packet::SubAck(p) => Some(p.message_id),
            Packet::Unsubscribe(p) => Some(p.message_id),
            Packet::UnsubAck(p) => Some(p.message_id),
            _ => None,
        }
    }

    /// Wire name, for logging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck(_) => "PUBACK",
            Packet::PubRec(_) => "PUBREC",
            Packet::PubRel(_) => "PUBREL",
            Packet::PubComp(_) => "PUBCOMP",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::SubAck(_) => "SUBACK",
            Packet::Unsubscribe(_) => "UNSUBSCRIBE",
            Packet::UnsubAck(_) => "UNSUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}

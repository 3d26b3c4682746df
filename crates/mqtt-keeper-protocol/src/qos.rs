//! QoS handshake transition functions.
//!
//! Each function takes the relevant slice of session state as plain values
//! and returns the actions the driving loop must perform, in order. Nothing
//! here touches a store, a socket, or a lock, which keeps every handshake
//! rule unit-testable in isolation.

use crate::packet::{Packet, PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket, ReasonCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QosAction {
    SendPubAck {
        message_id: u16,
        reason: ReasonCode,
    },
    SendPubRec {
        message_id: u16,
        reason: ReasonCode,
    },
    SendPubRel {
        message_id: u16,
    },
    SendPubComp {
        message_id: u16,
        reason: ReasonCode,
    },
    /// Hand the publish to the application handler.
    DeliverMessage {
        message_id: u16,
    },
    /// Persist a PUBREL marker in place of the stored publish.
    StorePubRel {
        message_id: u16,
    },
    /// Drop the stored record; the handshake moved past it.
    DiscardStored {
        message_id: u16,
    },
    /// Resolve the caller's delivery token successfully.
    CompleteDelivery {
        message_id: u16,
    },
    /// Resolve the caller's delivery token with the broker's error.
    FailDelivery {
        message_id: u16,
        reason: ReasonCode,
    },
}

impl QosAction {
    /// The wire packet for the `Send*` variants.
    #[must_use]
    pub fn to_packet(&self) -> Option<Packet> {
        match *self {
            QosAction::SendPubAck { message_id, reason } => {
                Some(Packet::PubAck(PubAckPacket { message_id, reason }))
            }
            QosAction::SendPubRec { message_id, reason } => {
                Some(Packet::PubRec(PubRecPacket { message_id, reason }))
            }
            QosAction::SendPubRel { message_id } => {
                Some(Packet::PubRel(PubRelPacket { message_id }))
            }
            QosAction::SendPubComp { message_id, reason } => {
                Some(Packet::PubComp(PubCompPacket { message_id, reason }))
            }
            _ => None,
        }
    }
}

/// PUBACK for an outgoing QoS 1 publish. An id with no pending publish is a
/// stale or spurious ack and changes nothing.
#[must_use]
pub fn handle_incoming_puback(
    message_id: u16,
    reason: ReasonCode,
    has_pending_publish: bool,
) -> Vec<QosAction> {
    if !has_pending_publish {
        return vec![];
    }
    vec![
        QosAction::DiscardStored { message_id },
        if reason.is_error() {
            QosAction::FailDelivery { message_id, reason }
        } else {
            QosAction::CompleteDelivery { message_id }
        },
    ]
}

/// PUBREC for an outgoing QoS 2 publish: swap the stored publish for a
/// PUBREL marker and release it. A broker-side error ends the flow early.
#[must_use]
pub fn handle_incoming_pubrec(
    message_id: u16,
    reason: ReasonCode,
    has_pending_publish: bool,
) -> Vec<QosAction> {
    if !has_pending_publish {
        return vec![];
    }
    if reason.is_error() {
        return vec![
            QosAction::DiscardStored { message_id },
            QosAction::FailDelivery { message_id, reason },
        ];
    }
    vec![
        QosAction::StorePubRel { message_id },
        QosAction::SendPubRel { message_id },
    ]
}

/// PUBCOMP closing an outgoing QoS 2 flow.
#[must_use]
pub fn handle_incoming_pubcomp(
    message_id: u16,
    reason: ReasonCode,
    has_pending_pubrel: bool,
) -> Vec<QosAction> {
    if !has_pending_pubrel {
        return vec![];
    }
    vec![
        QosAction::DiscardStored { message_id },
        if reason.is_error() {
            QosAction::FailDelivery { message_id, reason }
        } else {
            QosAction::CompleteDelivery { message_id }
        },
    ]
}

/// Incoming QoS 1 publish: deliver, then ack. The driving loop withholds the
/// PUBACK when the handler rejects the message, so the broker redelivers.
#[must_use]
pub fn handle_incoming_publish_qos1(message_id: u16) -> Vec<QosAction> {
    vec![
        QosAction::DeliverMessage { message_id },
        QosAction::SendPubAck {
            message_id,
            reason: ReasonCode::Success,
        },
    ]
}

/// Incoming QoS 2 publish. `already_delivered` is true when this id is held
/// in the incoming registry with delivery done; such a duplicate is answered
/// but never handed to the application again.
#[must_use]
pub fn handle_incoming_publish_qos2(message_id: u16, already_delivered: bool) -> Vec<QosAction> {
    if already_delivered {
        return vec![QosAction::SendPubRec {
            message_id,
            reason: ReasonCode::Success,
        }];
    }
    vec![
        QosAction::DeliverMessage { message_id },
        QosAction::SendPubRec {
            message_id,
            reason: ReasonCode::Success,
        },
    ]
}

/// Incoming PUBREL. The PUBCOMP goes out unconditionally so the broker can
/// always finish its side of the flow; an unknown id just carries the
/// not-found reason.
#[must_use]
pub fn handle_incoming_pubrel(message_id: u16, has_pending_record: bool) -> Vec<QosAction> {
    if has_pending_record {
        vec![
            QosAction::DiscardStored { message_id },
            QosAction::SendPubComp {
                message_id,
                reason: ReasonCode::Success,
            },
        ]
    } else {
        vec![QosAction::SendPubComp {
            message_id,
            reason: ReasonCode::PacketIdentifierNotFound,
        }]
    }
}

use serde::{Deserialize, Serialize};

/// Quality of service level for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Default for QoS {
    fn default() -> Self {
        QoS::AtMostOnce
    }
}

impl From<u8> for QoS {
    fn from(value: u8) -> Self {
        match value {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

impl QoS {
    /// QoS 1 and 2 operations carry a message id and expect an acknowledgment.
    #[must_use]
    pub fn needs_ack(self) -> bool {
        self != QoS::AtMostOnce
    }
}

/// Negotiated protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    V311,
    V5,
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        ProtocolVersion::V311
    }
}

impl ProtocolVersion {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            ProtocolVersion::V311 => 4,
            ProtocolVersion::V5 => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_roundtrip() {
        assert_eq!(QoS::from(0u8), QoS::AtMostOnce);
        assert_eq!(QoS::from(1u8), QoS::AtLeastOnce);
        assert_eq!(QoS::from(2u8), QoS::ExactlyOnce);
        assert_eq!(QoS::from(7u8), QoS::AtMostOnce);
        assert_eq!(u8::from(QoS::ExactlyOnce), 2);
    }

    #[test]
    fn qos_needs_ack() {
        assert!(!QoS::AtMostOnce.needs_ack());
        assert!(QoS::AtLeastOnce.needs_ack());
        assert!(QoS::ExactlyOnce.needs_ack());
    }

    #[test]
    fn protocol_version_bytes() {
        assert_eq!(ProtocolVersion::V311.as_u8(), 4);
        assert_eq!(ProtocolVersion::V5.as_u8(), 5);
    }
}

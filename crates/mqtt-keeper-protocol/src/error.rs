use crate::packet::{ConnectReturnCode, ReasonCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MqttError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid topic filter: {0}")]
    InvalidTopicFilter(String),

    #[error("Empty topic filter list")]
    EmptyTopicList,

    #[error("Invalid client ID: {0}")]
    InvalidClientId(String),

    #[error("Connection refused: {0:?}")]
    ConnectionRefused(ConnectReturnCode),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connect timeout")]
    ConnectTimeout,

    #[error("Keep alive timeout")]
    KeepAliveTimeout,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store is closed")]
    StoreClosed,

    #[error("Message removed: {0}")]
    MessageRemoved(u16),

    #[error("Message identifiers exhausted")]
    MessageIdExhausted,

    #[error("Publish failed: {0:?}")]
    PublishFailed(ReasonCode),

    #[error("Subscription failed with code {0}")]
    SubscriptionFailed(u8),

    #[error("Session is ending")]
    SessionEnding,

    #[error("Session has ended")]
    SessionEnded,
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        MqttError::Io(err.to_string())
    }
}

impl MqttError {
    /// Validation errors are reported synchronously; no packet is sent and no
    /// session state is mutated when one occurs.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTopicFilter(_) | Self::EmptyTopicList | Self::InvalidClientId(_)
        )
    }

    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionError(_) | Self::ConnectTimeout | Self::KeepAliveTimeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = MqttError::InvalidTopicFilter("a+/b".to_string());
        assert_eq!(err.to_string(), "Invalid topic filter: a+/b");

        let err = MqttError::MessageRemoved(42);
        assert_eq!(err.to_string(), "Message removed: 42");

        let err = MqttError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert_eq!(err.to_string(), "Connection refused: NotAuthorized");
    }

    #[test]
    fn classification() {
        assert!(MqttError::InvalidTopicFilter("#/x".into()).is_validation());
        assert!(MqttError::EmptyTopicList.is_validation());
        assert!(!MqttError::NotConnected.is_validation());

        assert!(MqttError::ConnectTimeout.is_transport());
        assert!(MqttError::Io("reset".into()).is_transport());
        assert!(!MqttError::StoreClosed.is_transport());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: MqttError = io_err.into();
        match err {
            MqttError::Io(msg) => assert!(msg.contains("refused")),
            other => panic!("expected Io, got {other:?}"),
        }
    }
}

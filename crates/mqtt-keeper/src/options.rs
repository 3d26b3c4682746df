//! Session configuration.

use crate::events::MessageHandler;
use mqtt_keeper_protocol::{
    KeepaliveConfig, MqttError, ProtocolVersion, QoS, ReconnectConfig, Result, SessionStore,
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Fired once the outgoing store write for a publish has settled, strictly
/// before the publish's own completion resolves.
pub type StorePutHook = Arc<dyn Fn() + Send + Sync>;

/// Per-publish options.
#[derive(Clone, Default)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
    pub cb_store_put: Option<StorePutHook>,
}

impl PublishOptions {
    #[must_use]
    pub fn qos(qos: QoS) -> Self {
        Self {
            qos,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }
}

impl std::fmt::Debug for PublishOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishOptions")
            .field("qos", &self.qos)
            .field("retain", &self.retain)
            .field("cb_store_put", &self.cb_store_put.is_some())
            .finish()
    }
}

/// Session-wide configuration. Defaults mirror a clean, auto-reconnecting
/// client with a generated client id.
#[derive(Clone)]
pub struct SessionOptions {
    pub client_id: Option<String>,
    /// Discard session state (subscriptions, in-flight entries) on both ends
    /// at disconnect. `false` requires an explicit client id.
    pub clean: bool,
    pub keepalive: KeepaliveConfig,
    pub reconnect: ReconnectConfig,
    /// Deadline for transport connect and for the CONNACK wait.
    pub connect_timeout: Duration,
    /// Park QoS 0 publishes while offline instead of dropping them.
    pub queue_qos_zero: bool,
    /// Replay active subscriptions after a reconnect without a resumed
    /// server-side session.
    pub resubscribe: bool,
    pub protocol_version: ProtocolVersion,
    pub incoming_store: Option<Arc<dyn SessionStore>>,
    pub outgoing_store: Option<Arc<dyn SessionStore>>,
    /// Acceptance gate for incoming messages. A handler error withholds the
    /// acknowledgment so the broker redelivers.
    pub message_handler: Option<MessageHandler>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            clean: true,
            keepalive: KeepaliveConfig::default(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(30),
            queue_qos_zero: true,
            resubscribe: true,
            protocol_version: ProtocolVersion::default(),
            incoming_store: None,
            outgoing_store: None,
            message_handler: None,
        }
    }
}

impl SessionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    #[must_use]
    pub fn keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    #[must_use]
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn queue_qos_zero(mut self, queue: bool) -> Self {
        self.queue_qos_zero = queue;
        self
    }

    #[must_use]
    pub fn resubscribe(mut self, resubscribe: bool) -> Self {
        self.resubscribe = resubscribe;
        self
    }

    #[must_use]
    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    #[must_use]
    pub fn incoming_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.incoming_store = Some(store);
        self
    }

    #[must_use]
    pub fn outgoing_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.outgoing_store = Some(store);
        self
    }

    #[must_use]
    pub fn message_handler(mut self, handler: MessageHandler) -> Self {
        self.message_handler = Some(handler);
        self
    }

    /// # Errors
    /// A persistent session (`clean = false`) without an explicit client id
    /// fails with `InvalidClientId`: the broker could not associate the
    /// session state with a generated id on the next run.
    pub fn validate(&self) -> Result<()> {
        match &self.client_id {
            Some(id) if id.is_empty() => Err(MqttError::InvalidClientId(
                "client id must not be empty".into(),
            )),
            None if !self.clean => Err(MqttError::InvalidClientId(
                "persistent sessions require an explicit client id".into(),
            )),
            _ => Ok(()),
        }
    }

    /// The configured client id, or a freshly generated one.
    #[must_use]
    pub fn resolve_client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            let suffix: u32 = rand::thread_rng().gen();
            format!("keeper-{suffix:08x}")
        })
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("client_id", &self.client_id)
            .field("clean", &self.clean)
            .field("keepalive", &self.keepalive)
            .field("reconnect", &self.reconnect)
            .field("connect_timeout", &self.connect_timeout)
            .field("queue_qos_zero", &self.queue_qos_zero)
            .field("resubscribe", &self.resubscribe)
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_session_requires_client_id() {
        let options = SessionOptions::new().clean(false);
        assert!(matches!(
            options.validate(),
            Err(MqttError::InvalidClientId(_))
        ));
        assert!(SessionOptions::new()
            .clean(false)
            .client_id("keeper-1")
            .validate()
            .is_ok());
    }

    #[test]
    fn empty_client_id_is_rejected() {
        assert!(matches!(
            SessionOptions::new().client_id("").validate(),
            Err(MqttError::InvalidClientId(_))
        ));
    }

    #[test]
    fn generated_client_ids_differ() {
        let options = SessionOptions::new();
        let a = options.resolve_client_id();
        let b = options.resolve_client_id();
        assert!(a.starts_with("keeper-"));
        assert_ne!(a, b);
    }
}

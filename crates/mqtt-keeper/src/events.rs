//! Lifecycle and delivery notifications.
//!
//! Every observable transition is pushed as a typed event onto one unbounded
//! channel handed out at session creation. The sender side never blocks and
//! tolerates a dropped receiver, so instrumentation cannot stall the session.

use bytes::Bytes;
use mqtt_keeper_protocol::packet::{Packet, PublishPacket};
use mqtt_keeper_protocol::{MqttError, QoS, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An application message as delivered to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

impl From<&PublishPacket> for Message {
    fn from(packet: &PublishPacket) -> Self {
        Self {
            topic: packet.topic.clone(),
            payload: packet.payload.clone(),
            qos: packet.qos,
            retain: packet.retain,
            dup: packet.dup,
        }
    }
}

/// Acceptance gate for incoming QoS 1/2 messages. Returning an error
/// withholds the acknowledgment; the broker will redeliver.
pub type MessageHandler = Arc<dyn Fn(&Message) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// CONNACK accepted; fired once per established connection.
    Connected { session_present: bool },
    /// About to make reconnect attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
    /// The transport closed; fired once per connection teardown.
    Closed,
    /// Entered the offline queueing state; once per transition, not per
    /// failed attempt.
    Offline,
    /// Terminal shutdown finished; fired exactly once.
    Ended,
    /// Delivered application message (exactly once per unique message).
    Message(Message),
    /// An in-flight publish was cancelled via `remove_outgoing_message`.
    MessageRemoved { message_id: u16 },
    /// Every packet written to the transport.
    PacketSend(Packet),
    /// Every packet read from the transport.
    PacketReceive(Packet),
    Error(MqttError),
}

/// Sender half used throughout the session internals.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    pub(crate) fn channel() -> (Self, SessionEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, SessionEvents { rx })
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

/// Receiving end of the session's event stream.
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    /// Next event, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Non-blocking poll, for tests and opportunistic draining.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_survives_dropped_receiver() {
        let (tx, events) = EventSender::channel();
        drop(events);
        tx.emit(SessionEvent::Offline);
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (tx, mut events) = EventSender::channel();
        tx.emit(SessionEvent::Connected {
            session_present: false,
        });
        tx.emit(SessionEvent::Offline);

        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Connected {
                session_present: false
            })
        ));
        assert!(matches!(events.recv().await, Some(SessionEvent::Offline)));
        assert!(events.try_recv().is_none());
    }
}

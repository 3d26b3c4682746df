//! Session core: the single serialized control sequence.
//!
//! All operation calls, incoming packets, and lifecycle transitions funnel
//! through this struct behind one async mutex, so no two handshake steps for
//! the same message id ever interleave, and a store write always settles
//! before a later packet for the same id can observe it.

use crate::events::{EventSender, Message, MessageHandler, SessionEvent};
use crate::options::{PublishOptions, SessionOptions, StorePutHook};
use crate::transport::PacketSink;
use bytes::Bytes;
use mqtt_keeper_protocol::packet::{
    Packet, PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket, PublishPacket, SubAckCode,
    SubAckPacket, SubscribeFilter, SubscribePacket, UnsubAckPacket, UnsubscribePacket,
};
use mqtt_keeper_protocol::qos::{
    handle_incoming_puback, handle_incoming_pubcomp, handle_incoming_publish_qos2,
    handle_incoming_pubrec, handle_incoming_pubrel, QosAction,
};
use mqtt_keeper_protocol::{
    topic, ConnectionEvent, ConnectionMachine, ConnectionState, DisconnectReason, IncomingInflight,
    IncomingPhase, MemoryStore, MessageIdAllocator, MqttError, OutgoingInflight, OutgoingPhase,
    OutgoingQueue, ProtocolVersion, QoS, ResubscribeTracker, Result, SessionStore, StoredPacket,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

/// Terminal outcome of an acknowledged operation.
#[derive(Debug)]
pub(crate) enum AckResult {
    Publish,
    Subscribe(Vec<SubAckCode>),
    Unsubscribe,
}

pub(crate) type AckSender = oneshot::Sender<Result<AckResult>>;
pub(crate) type AckReceiver = oneshot::Receiver<Result<AckResult>>;

/// A deferred operation's caller-side bookkeeping while it sits in the
/// offline queue.
pub(crate) struct PendingOp {
    ack: AckSender,
    store_hook: Option<StorePutHook>,
}

pub(crate) struct SessionCore {
    client_id: String,
    clean: bool,
    protocol_version: ProtocolVersion,
    queue_qos_zero: bool,
    resubscribe: bool,
    allocator: MessageIdAllocator,
    outgoing: OutgoingInflight,
    incoming: IncomingInflight,
    outgoing_store: Arc<dyn SessionStore>,
    incoming_store: Arc<dyn SessionStore>,
    queue: OutgoingQueue<PendingOp>,
    tracker: ResubscribeTracker,
    pending: HashMap<u16, AckSender>,
    machine: ConnectionMachine,
    sink: Option<Box<dyn PacketSink>>,
    events: EventSender,
    last_send: Arc<parking_lot::Mutex<tokio::time::Instant>>,
    idle: Arc<Notify>,
    message_handler: Option<MessageHandler>,
    connected_once: bool,
    /// The offline notification went out for the current outage. Reset on
    /// connect, so repeated failed attempts within one outage stay silent.
    offline_notified: bool,
    ended: bool,
}

impl SessionCore {
    pub(crate) fn new(
        options: &SessionOptions,
        client_id: String,
        events: EventSender,
        last_send: Arc<parking_lot::Mutex<tokio::time::Instant>>,
    ) -> Self {
        Self {
            client_id,
            clean: options.clean,
            protocol_version: options.protocol_version,
            queue_qos_zero: options.queue_qos_zero,
            resubscribe: options.resubscribe,
            allocator: MessageIdAllocator::new(),
            outgoing: OutgoingInflight::new(),
            incoming: IncomingInflight::new(),
            outgoing_store: options
                .outgoing_store
                .clone()
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
            incoming_store: options
                .incoming_store
                .clone()
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
            queue: OutgoingQueue::new(),
            tracker: ResubscribeTracker::new(),
            pending: HashMap::new(),
            machine: ConnectionMachine::new(options.reconnect.clone()),
            sink: None,
            events,
            last_send,
            idle: Arc::new(Notify::new()),
            message_handler: options.message_handler.clone(),
            connected_once: false,
            offline_notified: false,
            ended: false,
        }
    }

    pub(crate) fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub(crate) fn idle_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.idle)
    }

    pub(crate) fn stores(&self) -> (Arc<dyn SessionStore>, Arc<dyn SessionStore>) {
        (
            Arc::clone(&self.incoming_store),
            Arc::clone(&self.outgoing_store),
        )
    }

    pub(crate) fn replace_stores(
        &mut self,
        incoming: Arc<dyn SessionStore>,
        outgoing: Arc<dyn SessionStore>,
    ) {
        self.incoming_store = incoming;
        self.outgoing_store = outgoing;
    }

    /// No acknowledgment or queued work outstanding.
    pub(crate) fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.queue.is_empty()
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_one();
        }
    }

    fn check_accepting(&self) -> Result<()> {
        if self.ended {
            return Err(MqttError::SessionEnded);
        }
        if self.machine.state().is_ending() {
            return Err(MqttError::SessionEnding);
        }
        Ok(())
    }

    // ---- outbound path -------------------------------------------------

    /// Writes one packet, emitting the packet-send notification and feeding
    /// the keepalive timer.
    pub(crate) async fn send_packet(&mut self, packet: Packet) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(MqttError::NotConnected);
        };
        debug!(packet = packet.type_name(), id = ?packet.message_id(), "sending packet");
        sink.send(packet.clone()).await?;
        *self.last_send.lock() = tokio::time::Instant::now();
        self.events.emit(SessionEvent::PacketSend(packet));
        Ok(())
    }

    /// Best-effort write: a transport failure here is not fatal to the
    /// operation, the entry is persisted and will be replayed on reconnect.
    async fn send_or_defer(&mut self, packet: Packet) {
        if let Err(e) = self.send_packet(packet).await {
            warn!(error = %e, "send failed, entry will be replayed after reconnect");
        }
    }

    pub(crate) async fn publish(
        &mut self,
        topic_name: String,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<Option<AckReceiver>> {
        self.check_accepting()?;
        if topic_name.is_empty() || topic_name.contains(['+', '#', '\0']) {
            return Err(MqttError::InvalidTopicFilter(topic_name));
        }

        let connected = self.machine.state().is_connected();

        if options.qos == QoS::AtMostOnce {
            let packet = Packet::Publish(PublishPacket {
                topic: topic_name,
                payload,
                qos: QoS::AtMostOnce,
                retain: options.retain,
                dup: false,
                message_id: None,
            });
            if connected {
                self.send_packet(packet).await?;
            } else if self.queue_qos_zero {
                let (ack, rx) = oneshot::channel();
                self.queue.enqueue(
                    packet,
                    PendingOp {
                        ack,
                        store_hook: None,
                    },
                );
                return Ok(Some(rx));
            } else {
                debug!("dropping QoS 0 publish while offline");
            }
            return Ok(None);
        }

        let message_id = self.allocator.allocate()?;
        let packet = Packet::Publish(PublishPacket {
            topic: topic_name,
            payload,
            qos: options.qos,
            retain: options.retain,
            dup: false,
            message_id: Some(message_id),
        });
        let (ack, rx) = oneshot::channel();

        if connected {
            if let Err(e) = self
                .dispatch(
                    message_id,
                    packet,
                    PendingOp {
                        ack,
                        store_hook: options.cb_store_put,
                    },
                )
                .await
            {
                self.allocator.deallocate(message_id);
                return Err(e);
            }
        } else {
            self.queue.enqueue(
                packet,
                PendingOp {
                    ack,
                    store_hook: options.cb_store_put,
                },
            );
        }
        Ok(Some(rx))
    }

    /// Subscribes to the non-duplicate filters of `filters`. Returns `None`
    /// when every filter is already active at the requested QoS (no packet
    /// sent, empty grant list).
    pub(crate) async fn subscribe(
        &mut self,
        filters: Vec<SubscribeFilter>,
    ) -> Result<Option<AckReceiver>> {
        self.check_accepting()?;
        let names: Vec<&str> = filters.iter().map(|f| f.filter.as_str()).collect();
        topic::validate_filters(&names)?;

        let fresh: Vec<SubscribeFilter> = filters
            .into_iter()
            .filter(|f| !self.tracker.is_duplicate(f))
            .collect();
        if fresh.is_empty() {
            debug!("all filters already active, skipping subscribe");
            return Ok(None);
        }

        let message_id = self.allocator.allocate()?;
        self.tracker.record_subscribe(message_id, fresh.clone());
        let packet = Packet::Subscribe(SubscribePacket {
            message_id,
            filters: fresh,
        });
        let (ack, rx) = oneshot::channel();
        let op = PendingOp {
            ack,
            store_hook: None,
        };

        if self.machine.state().is_connected() {
            if let Err(e) = self.dispatch(message_id, packet, op).await {
                self.allocator.deallocate(message_id);
                self.tracker.abandon(message_id);
                return Err(e);
            }
        } else {
            self.queue.enqueue(packet, op);
        }
        Ok(Some(rx))
    }

    pub(crate) async fn unsubscribe(&mut self, filters: Vec<String>) -> Result<AckReceiver> {
        self.check_accepting()?;
        topic::validate_filters(&filters)?;

        let message_id = self.allocator.allocate()?;
        self.tracker.record_unsubscribe(message_id, filters.clone());
        let packet = Packet::Unsubscribe(UnsubscribePacket {
            message_id,
            filters,
        });
        let (ack, rx) = oneshot::channel();
        let op = PendingOp {
            ack,
            store_hook: None,
        };

        if self.machine.state().is_connected() {
            if let Err(e) = self.dispatch(message_id, packet, op).await {
                self.allocator.deallocate(message_id);
                self.tracker.abandon(message_id);
                return Err(e);
            }
        } else {
            self.queue.enqueue(packet, op);
        }
        Ok(rx)
    }

    /// Persists, registers, and sends one acknowledged operation.
    async fn dispatch(&mut self, message_id: u16, packet: Packet, op: PendingOp) -> Result<()> {
        let phase = match &packet {
            Packet::Publish(p) if p.qos == QoS::ExactlyOnce => OutgoingPhase::AwaitingPubrec,
            Packet::Publish(_) => OutgoingPhase::AwaitingPuback,
            Packet::Subscribe(_) => OutgoingPhase::AwaitingSuback,
            Packet::Unsubscribe(_) => OutgoingPhase::AwaitingUnsuback,
            other => {
                return Err(MqttError::ProtocolError(format!(
                    "cannot dispatch {}",
                    other.type_name()
                )))
            }
        };

        self.outgoing_store
            .put(StoredPacket::new(message_id, packet.clone()))
            .await?;
        if let Some(hook) = op.store_hook {
            hook();
        }
        self.outgoing.insert(message_id, packet.clone(), phase);
        self.pending.insert(message_id, op.ack);
        self.send_or_defer(packet).await;
        Ok(())
    }

    /// Cancels an in-flight or queued outgoing operation. Its waiter fails
    /// with `MessageRemoved` and the entry is never resent.
    pub(crate) async fn remove_outgoing_message(&mut self, message_id: u16) -> Result<()> {
        if let Some(entry) = self.queue.remove(message_id) {
            let _ = entry.token.ack.send(Err(MqttError::MessageRemoved(message_id)));
            self.allocator.deallocate(message_id);
            self.tracker.abandon(message_id);
            self.events
                .emit(SessionEvent::MessageRemoved { message_id });
            self.notify_if_idle();
            return Ok(());
        }

        if self.outgoing.remove(message_id).is_none() && !self.pending.contains_key(&message_id) {
            debug!(message_id, "no outgoing message to remove");
            return Ok(());
        }
        if let Err(e) = self.outgoing_store.del(message_id).await {
            warn!(message_id, error = %e, "store del failed during cancellation");
        }
        if let Some(ack) = self.pending.remove(&message_id) {
            let _ = ack.send(Err(MqttError::MessageRemoved(message_id)));
        }
        self.allocator.deallocate(message_id);
        self.tracker.abandon(message_id);
        self.events
            .emit(SessionEvent::MessageRemoved { message_id });
        self.notify_if_idle();
        Ok(())
    }

    // ---- inbound path --------------------------------------------------

    pub(crate) async fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Publish(p) => self.handle_publish(p).await,
            Packet::PubAck(p) => self.handle_puback(p).await,
            Packet::PubRec(p) => self.handle_pubrec(p).await,
            Packet::PubRel(p) => self.handle_pubrel(p).await,
            Packet::PubComp(p) => self.handle_pubcomp(p).await,
            Packet::SubAck(p) => self.handle_suback(p).await,
            Packet::UnsubAck(p) => self.handle_unsuback(p).await,
            other => debug!(packet = other.type_name(), "ignoring unexpected packet"),
        }
    }

    /// Runs the acceptance gate and, on success, the delivery notification.
    fn deliver(&mut self, message: &Message) -> Result<()> {
        if let Some(handler) = &self.message_handler {
            handler(message)?;
        }
        self.events.emit(SessionEvent::Message(message.clone()));
        Ok(())
    }

    async fn handle_publish(&mut self, publish: PublishPacket) {
        match publish.qos {
            QoS::AtMostOnce => {
                let message = Message::from(&publish);
                if let Err(e) = self.deliver(&message) {
                    debug!(topic = %message.topic, error = %e, "handler rejected QoS 0 message");
                }
            }
            QoS::AtLeastOnce => {
                let Some(message_id) = publish.message_id else {
                    warn!("QoS 1 publish without message id");
                    return;
                };
                let message = Message::from(&publish);
                if let Err(e) = self.deliver(&message) {
                    // withhold the ack; the broker will redeliver
                    debug!(message_id, error = %e, "handler rejected message, withholding PUBACK");
                    return;
                }
                self.send_or_defer(Packet::PubAck(PubAckPacket {
                    message_id,
                    reason: Default::default(),
                }))
                .await;
            }
            QoS::ExactlyOnce => self.handle_publish_qos2(publish).await,
        }
    }

    async fn handle_publish_qos2(&mut self, publish: PublishPacket) {
        let Some(message_id) = publish.message_id else {
            warn!("QoS 2 publish without message id");
            return;
        };

        let already_delivered = self.incoming.phase(message_id) == Some(IncomingPhase::AwaitingPubrel);
        if already_delivered {
            for action in handle_incoming_publish_qos2(message_id, true) {
                if let Some(packet) = action.to_packet() {
                    self.send_or_defer(packet).await;
                }
            }
            return;
        }

        // First sighting: establish the exactly-once record before anything
        // is visible to the application.
        if self.incoming.phase(message_id).is_none() {
            let record = StoredPacket::new(message_id, Packet::Publish(publish.clone()));
            if let Err(e) = self.incoming_store.put(record).await {
                warn!(message_id, error = %e, "incoming store put failed, withholding PUBREC");
                self.events.emit(SessionEvent::Error(e));
                return;
            }
            self.incoming.insert(message_id, IncomingPhase::AwaitingDelivery);
        }

        let message = Message::from(&publish);
        if let Err(e) = self.deliver(&message) {
            // stays in AwaitingDelivery; a broker redelivery retries the handler
            debug!(message_id, error = %e, "handler rejected message, withholding PUBREC");
            return;
        }

        let record = StoredPacket::delivered(message_id, Packet::Publish(publish));
        if let Err(e) = self.incoming_store.put(record).await {
            warn!(message_id, error = %e, "incoming store update failed");
            self.events.emit(SessionEvent::Error(e));
        }
        self.incoming.insert(message_id, IncomingPhase::AwaitingPubrel);
        self.send_or_defer(Packet::PubRec(PubRecPacket {
            message_id,
            reason: Default::default(),
        }))
        .await;
    }

    async fn handle_puback(&mut self, ack: PubAckPacket) {
        let has_pending = self.outgoing.phase(ack.message_id) == Some(OutgoingPhase::AwaitingPuback);
        let actions = handle_incoming_puback(ack.message_id, ack.reason, has_pending);
        if actions.is_empty() {
            debug!(message_id = ack.message_id, "PUBACK for unknown id, ignoring");
        }
        self.run_outgoing_actions(actions).await;
    }

    async fn handle_pubrec(&mut self, rec: PubRecPacket) {
        match self.outgoing.phase(rec.message_id) {
            // duplicate PUBREC after we already released PUBREL: resend it,
            // nothing to delete twice
            Some(OutgoingPhase::AwaitingPubcomp) => {
                self.send_or_defer(Packet::PubRel(PubRelPacket {
                    message_id: rec.message_id,
                }))
                .await;
            }
            phase => {
                let has_pending = phase == Some(OutgoingPhase::AwaitingPubrec);
                let actions = handle_incoming_pubrec(rec.message_id, rec.reason, has_pending);
                self.run_outgoing_actions(actions).await;
            }
        }
    }

    async fn handle_pubcomp(&mut self, comp: PubCompPacket) {
        let has_pending =
            self.outgoing.phase(comp.message_id) == Some(OutgoingPhase::AwaitingPubcomp);
        let actions = handle_incoming_pubcomp(comp.message_id, comp.reason, has_pending);
        self.run_outgoing_actions(actions).await;
    }

    async fn handle_pubrel(&mut self, rel: PubRelPacket) {
        let message_id = rel.message_id;
        let has_record = self.incoming.contains(message_id);
        for action in handle_incoming_pubrel(message_id, has_record) {
            match action {
                QosAction::DiscardStored { message_id } => {
                    self.incoming.remove(message_id);
                    // the PUBCOMP goes out regardless of the store outcome
                    if let Err(e) = self.incoming_store.del(message_id).await {
                        warn!(message_id, error = %e, "incoming store del failed");
                        self.events.emit(SessionEvent::Error(e));
                    }
                }
                action => {
                    if let Some(packet) = action.to_packet() {
                        self.send_or_defer(packet).await;
                    }
                }
            }
        }
    }

    /// Applies the transition actions for an outgoing-side acknowledgment.
    async fn run_outgoing_actions(&mut self, actions: Vec<QosAction>) {
        let mut store_error: Option<MqttError> = None;
        for action in actions {
            match action {
                QosAction::DiscardStored { message_id } => {
                    self.outgoing.remove(message_id);
                    if let Err(e) = self.outgoing_store.del(message_id).await {
                        warn!(message_id, error = %e, "outgoing store del failed");
                        store_error = Some(e);
                    }
                }
                QosAction::StorePubRel { message_id } => {
                    let marker = Packet::PubRel(PubRelPacket { message_id });
                    if let Err(e) = self
                        .outgoing_store
                        .put(StoredPacket::new(message_id, marker.clone()))
                        .await
                    {
                        warn!(message_id, error = %e, "failed to persist PUBREL marker");
                    }
                    self.outgoing
                        .advance(message_id, marker, OutgoingPhase::AwaitingPubcomp);
                }
                QosAction::CompleteDelivery { message_id } => {
                    let result = match store_error.take() {
                        Some(e) => Err(e),
                        None => Ok(AckResult::Publish),
                    };
                    self.resolve_pending(message_id, result);
                }
                QosAction::FailDelivery { message_id, reason } => {
                    self.outgoing.remove(message_id);
                    self.resolve_pending(message_id, Err(MqttError::PublishFailed(reason)));
                }
                action => {
                    if let Some(packet) = action.to_packet() {
                        self.send_or_defer(packet).await;
                    }
                }
            }
        }
    }

    fn resolve_pending(&mut self, message_id: u16, result: Result<AckResult>) {
        if let Some(ack) = self.pending.remove(&message_id) {
            let _ = ack.send(result);
        }
        self.allocator.deallocate(message_id);
        self.notify_if_idle();
    }

    async fn handle_suback(&mut self, suback: SubAckPacket) {
        let message_id = suback.message_id;
        if !self.tracker.complete_subscribe(message_id, &suback.grants) {
            debug!(message_id, "SUBACK for unknown id, ignoring");
            return;
        }
        self.outgoing.remove(message_id);
        if let Err(e) = self.outgoing_store.del(message_id).await {
            warn!(message_id, error = %e, "outgoing store del failed");
        }
        let all_rejected =
            !suback.grants.is_empty() && suback.grants.iter().all(|g| g.granted_qos().is_none());
        let result = if all_rejected {
            Err(MqttError::SubscriptionFailed(0x80))
        } else {
            Ok(AckResult::Subscribe(suback.grants))
        };
        self.resolve_pending(message_id, result);
    }

    async fn handle_unsuback(&mut self, unsuback: UnsubAckPacket) {
        let message_id = unsuback.message_id;
        if !self.tracker.complete_unsubscribe(message_id) {
            debug!(message_id, "UNSUBACK for unknown id, ignoring");
            return;
        }
        self.outgoing.remove(message_id);
        if let Err(e) = self.outgoing_store.del(message_id).await {
            warn!(message_id, error = %e, "outgoing store del failed");
        }
        self.resolve_pending(message_id, Ok(AckResult::Unsubscribe));
    }

    // ---- lifecycle -----------------------------------------------------

    pub(crate) fn mark_connecting(&mut self) {
        self.machine.transition(&ConnectionEvent::Connecting);
    }

    /// Entry sequence for a fresh connection: restore subscriptions, replay
    /// persisted in-flight work with original ids, then flush the queue in
    /// submission order.
    pub(crate) async fn on_connected(
        &mut self,
        sink: Box<dyn PacketSink>,
        session_present: bool,
    ) {
        self.sink = Some(sink);
        self.machine
            .transition(&ConnectionEvent::Connected { session_present });
        info!(
            client_id = %self.client_id,
            session_present,
            "connected"
        );
        self.events
            .emit(SessionEvent::Connected { session_present });

        self.offline_notified = false;
        if self.resubscribe {
            if self.connected_once && !session_present {
                self.restore_subscriptions().await;
            }
        } else {
            self.tracker.clear();
        }
        self.replay_outgoing().await;
        self.replay_incoming().await;
        self.flush_queue().await;
        self.connected_once = true;
    }

    async fn restore_subscriptions(&mut self) {
        let filters = self.tracker.snapshot();
        if filters.is_empty() {
            return;
        }
        info!(count = filters.len(), "restoring subscriptions");
        let message_id = match self.allocator.allocate() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "cannot restore subscriptions");
                return;
            }
        };
        self.tracker.record_subscribe(message_id, filters.clone());
        let packet = Packet::Subscribe(SubscribePacket {
            message_id,
            filters,
        });
        if let Err(e) = self
            .outgoing_store
            .put(StoredPacket::new(message_id, packet.clone()))
            .await
        {
            warn!(message_id, error = %e, "failed to persist resubscribe");
        }
        self.outgoing
            .insert(message_id, packet.clone(), OutgoingPhase::AwaitingSuback);
        self.send_or_defer(packet).await;
    }

    /// Resends persisted outgoing entries in their original order, re-using
    /// their original ids and marking replayed publishes as duplicates.
    async fn replay_outgoing(&mut self) {
        for message_id in self.outgoing_store.ids() {
            let record = match self.outgoing_store.get(message_id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(message_id, error = %e, "outgoing store get failed during replay");
                    continue;
                }
            };
            if !self.allocator.register(message_id) && !self.pending.contains_key(&message_id) {
                debug!(message_id, "id already reserved during replay");
            }
            match record.packet {
                Packet::Publish(mut publish) => {
                    publish.dup = true;
                    let phase = if publish.qos == QoS::ExactlyOnce {
                        OutgoingPhase::AwaitingPubrec
                    } else {
                        OutgoingPhase::AwaitingPuback
                    };
                    let packet = Packet::Publish(publish);
                    self.outgoing.insert(message_id, packet.clone(), phase);
                    self.send_or_defer(packet).await;
                }
                packet @ Packet::PubRel(_) => {
                    self.outgoing
                        .insert(message_id, packet.clone(), OutgoingPhase::AwaitingPubcomp);
                    self.send_or_defer(packet).await;
                }
                Packet::Subscribe(subscribe) => {
                    self.tracker
                        .record_subscribe(message_id, subscribe.filters.clone());
                    let packet = Packet::Subscribe(subscribe);
                    self.outgoing
                        .insert(message_id, packet.clone(), OutgoingPhase::AwaitingSuback);
                    self.send_or_defer(packet).await;
                }
                Packet::Unsubscribe(unsubscribe) => {
                    self.tracker
                        .record_unsubscribe(message_id, unsubscribe.filters.clone());
                    let packet = Packet::Unsubscribe(unsubscribe);
                    self.outgoing
                        .insert(message_id, packet.clone(), OutgoingPhase::AwaitingUnsuback);
                    self.send_or_defer(packet).await;
                }
                other => {
                    warn!(message_id, packet = other.type_name(), "unexpected stored packet");
                }
            }
        }
    }

    /// Resumes incoming QoS 2 handshakes from their persisted sub-state.
    /// Already-delivered entries wait for PUBREL without redelivery.
    async fn replay_incoming(&mut self) {
        for message_id in self.incoming_store.ids() {
            match self.incoming_store.get(message_id).await {
                Ok(Some(record)) => {
                    let phase = if record.delivered {
                        IncomingPhase::AwaitingPubrel
                    } else {
                        IncomingPhase::AwaitingDelivery
                    };
                    self.incoming.insert(message_id, phase);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(message_id, error = %e, "incoming store get failed during replay");
                }
            }
        }
    }

    async fn flush_queue(&mut self) {
        let entries = self.queue.drain();
        if entries.is_empty() {
            return;
        }
        info!(count = entries.len(), "flushing offline queue");
        for entry in entries {
            match entry.packet {
                packet @ Packet::Publish(PublishPacket {
                    qos: QoS::AtMostOnce,
                    ..
                }) => {
                    let result = self.send_packet(packet).await;
                    let _ = entry.token.ack.send(result.map(|()| AckResult::Publish));
                }
                packet => {
                    let Some(message_id) = packet.message_id() else {
                        continue;
                    };
                    if let Err(e) = self.dispatch(message_id, packet, entry.token).await {
                        warn!(message_id, error = %e, "failed to flush queued operation");
                    }
                }
            }
        }
        self.notify_if_idle();
    }

    /// Transport gone. Emits the close notification, and the offline
    /// notification exactly once per outage regardless of how many attempts
    /// fail before the session comes back.
    pub(crate) fn on_disconnected(&mut self, reason: DisconnectReason) {
        let had_transport = self.sink.take().is_some();
        if had_transport {
            self.events.emit(SessionEvent::Closed);
        }
        let state = self
            .machine
            .transition(&ConnectionEvent::ConnectionLost { reason: reason.clone() });
        info!(?reason, ?state, "disconnected");
        if state.is_offline() && !self.offline_notified {
            self.offline_notified = true;
            self.events.emit(SessionEvent::Offline);
        }
    }

    pub(crate) fn next_reconnect_delay(&mut self) -> Option<(std::time::Duration, u32)> {
        let delay = self.machine.next_reconnect_delay()?;
        Some((delay, self.machine.attempt()))
    }

    pub(crate) fn begin_end(&mut self) {
        self.machine.transition(&ConnectionEvent::EndRequested);
    }

    /// Fails every waiter and queued operation with `error`, marking the
    /// session terminally ended.
    pub(crate) fn fail_all_pending(&mut self, error: &MqttError) {
        for (_, ack) in self.pending.drain() {
            let _ = ack.send(Err(error.clone()));
        }
        for entry in self.queue.drain() {
            let _ = entry.token.ack.send(Err(error.clone()));
        }
        self.allocator.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.machine.transition(&ConnectionEvent::Ended);
        self.ended = true;
        self.idle.notify_one();
    }

    /// Re-arms the session after a completed `end`.
    pub(crate) fn revive(&mut self) {
        self.ended = false;
        self.connected_once = false;
        self.offline_notified = false;
        self.machine = ConnectionMachine::new(self.machine.reconnect_config().clone());
    }

    pub(crate) fn connect_settings(&self) -> (String, bool, ProtocolVersion) {
        (self.client_id.clone(), self.clean, self.protocol_version)
    }
}

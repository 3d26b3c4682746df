//! Connection manager task.
//!
//! One background task per session: connect (with deadline), run the
//! connected select loop (reader + keepalive + shutdown), then either
//! schedule a reconnect after the fixed period or stop. The session core is
//! only locked per packet, so operations interleave freely with reads.

use crate::events::{EventSender, SessionEvent};
use crate::session::SessionCore;
use crate::transport::{Connector, PacketSink, PacketStream};
use mqtt_keeper_protocol::packet::{ConnAckPacket, ConnectPacket, Packet};
use mqtt_keeper_protocol::{
    DisconnectReason, KeepaliveAction, KeepaliveConfig, KeepaliveTracker, MqttError, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub(crate) struct ConnectSettings {
    pub(crate) keepalive: KeepaliveConfig,
    pub(crate) connect_timeout: Duration,
}

pub(crate) struct ConnectionTask {
    pub(crate) core: Arc<Mutex<SessionCore>>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) settings: ConnectSettings,
    pub(crate) events: EventSender,
    pub(crate) last_send: Arc<parking_lot::Mutex<Instant>>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl ConnectionTask {
    pub(crate) async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.core.lock().await.mark_connecting();

            match self.connect_once().await {
                Ok((sink, stream, connack)) => {
                    if !connack.return_code.is_accepted() {
                        warn!(code = ?connack.return_code, "broker refused connection");
                        self.events.emit(SessionEvent::Error(MqttError::ConnectionRefused(
                            connack.return_code,
                        )));
                        self.core
                            .lock()
                            .await
                            .on_disconnected(DisconnectReason::ConnectRefused);
                    } else {
                        {
                            let mut core = self.core.lock().await;
                            core.on_connected(sink, connack.session_present).await;
                        }
                        let reason = self.run_connected(stream).await;
                        let mut core = self.core.lock().await;
                        if matches!(reason, DisconnectReason::ClientInitiated) {
                            // orderly goodbye; the broker must see DISCONNECT
                            // before the stream ends
                            if let Err(e) = core.send_packet(Packet::Disconnect).await {
                                debug!(error = %e, "DISCONNECT send failed during shutdown");
                            }
                        }
                        core.on_disconnected(reason);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "connect attempt failed");
                    self.events.emit(SessionEvent::Error(e.clone()));
                    self.core
                        .lock()
                        .await
                        .on_disconnected(DisconnectReason::NetworkError(e.to_string()));
                }
            }

            let Some((delay, attempt)) = self.core.lock().await.next_reconnect_delay() else {
                break;
            };
            debug!(attempt, ?delay, "scheduling reconnect");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
            self.events.emit(SessionEvent::Reconnecting { attempt });
        }
        debug!("connection task exiting");
    }

    /// Transport connect, CONNECT write, and CONNACK wait, all under the
    /// configured deadline. A failure here counts as one attempt.
    async fn connect_once(
        &self,
    ) -> Result<(Box<dyn PacketSink>, Box<dyn PacketStream>, ConnAckPacket)> {
        let timeout = self.settings.connect_timeout;
        let (mut sink, mut stream) = tokio::time::timeout(timeout, self.connector.connect())
            .await
            .map_err(|_| MqttError::ConnectTimeout)??;

        let (client_id, clean_session, protocol_version) =
            self.core.lock().await.connect_settings();
        info!(client_id = %client_id, clean_session, "connecting");
        let connect = Packet::Connect(ConnectPacket {
            client_id,
            clean_session,
            keep_alive_secs: self.settings.keepalive.connect_seconds(),
            protocol_version,
        });
        sink.send(connect.clone()).await?;
        *self.last_send.lock() = Instant::now();
        self.events.emit(SessionEvent::PacketSend(connect));

        let packet = tokio::time::timeout(timeout, stream.recv())
            .await
            .map_err(|_| MqttError::ConnectTimeout)??
            .ok_or_else(|| MqttError::ConnectionError("closed before CONNACK".into()))?;
        self.events.emit(SessionEvent::PacketReceive(packet.clone()));
        match packet {
            Packet::ConnAck(connack) => Ok((sink, stream, connack)),
            other => Err(MqttError::ProtocolError(format!(
                "expected CONNACK, got {}",
                other.type_name()
            ))),
        }
    }

    /// The connected select loop. Returns why the connection ended.
    async fn run_connected(&mut self, mut stream: Box<dyn PacketStream>) -> DisconnectReason {
        let keepalive = self.settings.keepalive;
        let mut tracker = KeepaliveTracker::new(keepalive);
        let mut deadline = Instant::now() + keepalive.interval;

        loop {
            tokio::select! {
                packet = stream.recv() => match packet {
                    Ok(Some(packet)) => {
                        self.events.emit(SessionEvent::PacketReceive(packet.clone()));
                        match packet {
                            Packet::PingResp => tracker.on_pingresp(),
                            Packet::ConnAck(_) => {
                                warn!("unexpected CONNACK on established connection");
                            }
                            Packet::Disconnect => return DisconnectReason::ServerClosed,
                            packet => self.core.lock().await.handle_packet(packet).await,
                        }
                    }
                    Ok(None) => return DisconnectReason::ServerClosed,
                    Err(e) => return DisconnectReason::NetworkError(e.to_string()),
                },
                () = tokio::time::sleep_until(deadline), if keepalive.enabled() => {
                    let now = Instant::now();
                    // outbound traffic pushed the silence window forward
                    if tracker.on_packet_sent() {
                        let idle_deadline = *self.last_send.lock() + keepalive.interval;
                        if idle_deadline > now {
                            deadline = idle_deadline;
                            continue;
                        }
                    }
                    match tracker.on_deadline() {
                        KeepaliveAction::SendPing => {
                            debug!("keepalive deadline, sending PINGREQ");
                            if let Err(e) = self.core.lock().await.send_packet(Packet::PingReq).await {
                                return DisconnectReason::NetworkError(e.to_string());
                            }
                            deadline = now + keepalive.interval;
                        }
                        KeepaliveAction::Timeout => {
                            warn!("no PINGRESP within keepalive interval, dropping connection");
                            self.events.emit(SessionEvent::Error(MqttError::KeepAliveTimeout));
                            return DisconnectReason::KeepAliveTimeout;
                        }
                    }
                },
                _ = self.shutdown.changed() => return DisconnectReason::ClientInitiated,
            }
        }
    }
}

//! Public session handle.

use crate::connection::{ConnectSettings, ConnectionTask};
use crate::events::{EventSender, SessionEvents};
use crate::options::{PublishOptions, SessionOptions};
use crate::session::{AckResult, SessionCore};
use crate::transport::Connector;
use bytes::Bytes;
use mqtt_keeper_protocol::packet::{SubAckCode, SubscribeFilter};
use mqtt_keeper_protocol::{ConnectionState, MqttError, Result, SessionStore};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

/// Replacement store pair for [`Session::reconnect`].
#[derive(Clone)]
pub struct SessionStores {
    pub incoming: Arc<dyn SessionStore>,
    pub outgoing: Arc<dyn SessionStore>,
}

#[derive(Default)]
enum EndState {
    #[default]
    Running,
    /// A caller claimed the shutdown; others wait on the idle notify.
    Ending,
    Done(Result<()>),
}

struct Shared {
    core: Arc<Mutex<SessionCore>>,
    connector: Arc<dyn Connector>,
    settings: ConnectSettings,
    events: EventSender,
    last_send: Arc<parking_lot::Mutex<tokio::time::Instant>>,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
    end_state: Mutex<EndState>,
    end_done: Arc<tokio::sync::Notify>,
}

/// Handle to one client session. Cheap to clone; all clones drive the same
/// session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Starts the session: spawns the connection task and returns the handle
    /// together with the lifecycle event stream.
    ///
    /// # Errors
    /// Fails on invalid options (see [`SessionOptions::validate`]); the
    /// first connection attempt itself happens in the background.
    pub fn connect(
        options: SessionOptions,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, SessionEvents)> {
        options.validate()?;
        let client_id = options.resolve_client_id();
        info!(client_id = %client_id, "starting session");

        let (events, event_stream) = EventSender::channel();
        let last_send = Arc::new(parking_lot::Mutex::new(tokio::time::Instant::now()));
        let core = Arc::new(Mutex::new(SessionCore::new(
            &options,
            client_id,
            events.clone(),
            Arc::clone(&last_send),
        )));
        let settings = ConnectSettings {
            keepalive: options.keepalive,
            connect_timeout: options.connect_timeout,
        };

        let running = spawn_connection(
            &core,
            &connector,
            settings.clone(),
            events.clone(),
            &last_send,
        );
        let shared = Arc::new(Shared {
            core,
            connector,
            settings,
            events,
            last_send,
            task: Mutex::new(Some(running)),
            end_state: Mutex::new(EndState::Running),
            end_done: Arc::new(tokio::sync::Notify::new()),
        });

        Ok((Self { shared }, event_stream))
    }

    /// Publishes `payload` to `topic`. Resolves when the QoS contract is
    /// satisfied: immediately for QoS 0, on PUBACK for QoS 1, on PUBCOMP for
    /// QoS 2. While offline the operation is queued (QoS 0 subject to
    /// `queue_qos_zero`) and resolves after the flush on reconnect.
    ///
    /// # Errors
    /// Validation errors synchronously; broker rejections, cancellation, or
    /// session teardown through the returned future.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<()> {
        let receiver = {
            let mut core = self.shared.core.lock().await;
            core.publish(topic.into(), payload.into(), options).await?
        };
        match receiver {
            None => Ok(()),
            Some(rx) => match rx.await {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(MqttError::SessionEnded),
            },
        }
    }

    /// Subscribes to `filters`, returning the per-filter grants. Filters
    /// already active at the same QoS are not re-sent; if every filter is a
    /// duplicate the grant list is empty and no packet crosses the wire.
    ///
    /// # Errors
    /// `InvalidTopicFilter`/`EmptyTopicList` synchronously with no packet
    /// sent; `SubscriptionFailed` when the broker rejects every filter.
    pub async fn subscribe(&self, filters: Vec<SubscribeFilter>) -> Result<Vec<SubAckCode>> {
        let receiver = {
            let mut core = self.shared.core.lock().await;
            core.subscribe(filters).await?
        };
        match receiver {
            None => Ok(Vec::new()),
            Some(rx) => match rx.await {
                Ok(Ok(AckResult::Subscribe(grants))) => Ok(grants),
                Ok(Ok(_)) => Err(MqttError::ProtocolError(
                    "subscribe resolved with mismatched ack".into(),
                )),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(MqttError::SessionEnded),
            },
        }
    }

    /// # Errors
    /// Filter validation errors synchronously; teardown through the future.
    pub async fn unsubscribe(&self, filters: Vec<String>) -> Result<()> {
        let receiver = {
            let mut core = self.shared.core.lock().await;
            core.unsubscribe(filters).await?
        };
        match receiver.await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(MqttError::SessionEnded),
        }
    }

    /// Cancels an in-flight or queued outgoing publish. Its waiter resolves
    /// with `MessageRemoved` and the message is never resent.
    ///
    /// # Errors
    /// Store deletion failures are logged, not returned; the call succeeds
    /// whenever the id could be released.
    pub async fn remove_outgoing_message(&self, message_id: u16) -> Result<()> {
        self.shared
            .core
            .lock()
            .await
            .remove_outgoing_message(message_id)
            .await
    }

    /// Current connection state; a snapshot that may change immediately.
    pub async fn state(&self) -> ConnectionState {
        self.shared.core.lock().await.state()
    }

    /// Terminates the session: stops timers and reconnection, closes the
    /// transport and both stores, and emits the terminal `Ended` event once.
    /// With `force`, waiting acknowledgments fail immediately; otherwise the
    /// call first waits for all in-flight and queued operations to settle.
    ///
    /// Idempotent: concurrent and repeated calls all resolve with the result
    /// of the one shutdown.
    ///
    /// # Errors
    /// Store close failures are returned here and only here.
    pub async fn end(&self, force: bool) -> Result<()> {
        loop {
            {
                let mut state = self.shared.end_state.lock().await;
                match &*state {
                    EndState::Done(result) => return result.clone(),
                    EndState::Ending => {}
                    EndState::Running => {
                        *state = EndState::Ending;
                        break;
                    }
                }
            }
            self.shared.end_done.notified().await;
        }

        let result = self.shutdown(force).await;
        *self.shared.end_state.lock().await = EndState::Done(result.clone());
        self.shared.end_done.notify_waiters();
        result
    }

    async fn shutdown(&self, force: bool) -> Result<()> {
        let idle = {
            let mut core = self.shared.core.lock().await;
            core.begin_end();
            core.idle_notify()
        };

        if !force {
            loop {
                if self.shared.core.lock().await.is_idle() {
                    break;
                }
                idle.notified().await;
            }
        }

        let task = self.shared.task.lock().await.take();
        if let Some((shutdown_tx, handle)) = task {
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
        }

        let mut core = self.shared.core.lock().await;
        core.fail_all_pending(&MqttError::SessionEnded);
        let (incoming, outgoing) = core.stores();
        drop(core);

        let incoming_result = incoming.close().await;
        let outgoing_result = outgoing.close().await;
        self.shared.events.emit(crate::events::SessionEvent::Ended);
        info!("session ended");
        incoming_result.and(outgoing_result)
    }

    /// Re-arms connection attempts after a completed [`Session::end`],
    /// optionally swapping in fresh stores. Safe to call from a disconnect
    /// event handler. A no-op while the session is still running.
    ///
    /// # Errors
    /// Currently infallible; reserved for transport-level rearm failures.
    pub async fn reconnect(&self, stores: Option<SessionStores>) -> Result<()> {
        {
            let mut state = self.shared.end_state.lock().await;
            match &*state {
                EndState::Running => return Ok(()),
                EndState::Ending => return Ok(()),
                EndState::Done(_) => *state = EndState::Running,
            }
        }

        {
            let mut core = self.shared.core.lock().await;
            if let Some(stores) = stores {
                core.replace_stores(stores.incoming, stores.outgoing);
            }
            core.revive();
        }
        info!("re-arming connection attempts");
        let running = spawn_connection(
            &self.shared.core,
            &self.shared.connector,
            self.shared.settings.clone(),
            self.shared.events.clone(),
            &self.shared.last_send,
        );
        *self.shared.task.lock().await = Some(running);
        Ok(())
    }
}

fn spawn_connection(
    core: &Arc<Mutex<SessionCore>>,
    connector: &Arc<dyn Connector>,
    settings: ConnectSettings,
    events: EventSender,
    last_send: &Arc<parking_lot::Mutex<tokio::time::Instant>>,
) -> (watch::Sender<bool>, JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = ConnectionTask {
        core: Arc::clone(core),
        connector: Arc::clone(connector),
        settings,
        events,
        last_send: Arc::clone(last_send),
        shutdown: shutdown_rx,
    };
    (shutdown_tx, tokio::spawn(task.run()))
}

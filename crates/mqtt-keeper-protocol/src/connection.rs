//! Connection lifecycle state machine.
//!
//! Tracks where the session is in its connect / connected / offline /
//! shutdown cycle and decides whether a dropped connection should be retried.
//! Reconnection uses a fixed period; a zero period disables it. The machine
//! is pure state, the driving loop lives in the client crate.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// A transport connect or CONNECT/CONNACK exchange is in progress.
    Connecting,
    Connected,
    /// Connection lost with reconnection pending; operations queue here.
    Offline,
    /// A deliberate shutdown is in progress; no reconnection follows.
    Disconnecting,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }

    /// True while requests should be parked in the offline queue rather than
    /// written to a transport.
    #[must_use]
    pub fn is_queueing(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Connecting | Self::Offline)
    }

    /// True once shutdown started; new requests are rejected outright.
    #[must_use]
    pub fn is_ending(&self) -> bool {
        matches!(self, Self::Disconnecting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientInitiated,
    ServerClosed,
    NetworkError(String),
    ProtocolError(String),
    KeepAliveTimeout,
    ConnectRefused,
}

/// Lifecycle inputs fed to [`ConnectionMachine::transition`].
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connecting,
    Connected { session_present: bool },
    ConnectionLost { reason: DisconnectReason },
    EndRequested,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Fixed delay between reconnect attempts. Zero disables reconnection.
    pub period: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            period: Duration::ZERO,
            max_attempts: None,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.period.is_zero()
    }

    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        if !self.enabled() {
            return false;
        }
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionMachine {
    state: ConnectionState,
    reconnect: ReconnectConfig,
    session_present: bool,
    attempt: u32,
}

impl ConnectionMachine {
    #[must_use]
    pub fn new(reconnect: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect,
            session_present: false,
            attempt: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn session_present(&self) -> bool {
        self.session_present
    }

    #[must_use]
    pub fn reconnect_config(&self) -> &ReconnectConfig {
        &self.reconnect
    }

    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn transition(&mut self, event: &ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::Connecting => {
                if !self.state.is_ending() {
                    self.state = ConnectionState::Connecting;
                }
            }
            ConnectionEvent::Connected { session_present } => {
                self.state = ConnectionState::Connected;
                self.session_present = *session_present;
                self.attempt = 0;
            }
            ConnectionEvent::ConnectionLost { .. } => {
                self.session_present = false;
                if self.state.is_ending() {
                    // shutdown path, Ended follows
                } else if self.reconnect.should_retry(self.attempt) {
                    self.state = ConnectionState::Offline;
                } else {
                    self.state = ConnectionState::Disconnected;
                }
            }
            ConnectionEvent::EndRequested => {
                self.state = ConnectionState::Disconnecting;
            }
            ConnectionEvent::Ended => {
                self.state = ConnectionState::Disconnected;
                self.session_present = false;
            }
        }
        self.state
    }

    /// The delay before the next reconnect attempt, or `None` when the
    /// machine has given up. Advances the attempt counter.
    pub fn next_reconnect_delay(&mut self) -> Option<Duration> {
        if self.state != ConnectionState::Offline || !self.reconnect.should_retry(self.attempt) {
            return None;
        }
        self.attempt += 1;
        Some(self.reconnect.period)
    }
}

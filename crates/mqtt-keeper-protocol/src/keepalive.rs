//! Keepalive timing decisions.
//!
//! The client pings the broker once per keepalive interval of outbound
//! silence and expects a PINGRESP before the next deadline. The tracker here
//! is pure bookkeeping; the client crate owns the actual timer and feeds
//! deadline expirations in as ticks.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Interval between pings. Zero disables keepalive entirely.
    pub interval: Duration,
    /// Restart the ping timer whenever any packet is written, so an active
    /// session pings only during genuine silence.
    pub reschedule_on_send: bool,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            reschedule_on_send: true,
        }
    }
}

impl KeepaliveConfig {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
            reschedule_on_send: true,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Seconds value advertised in CONNECT, saturating at the field width.
    #[must_use]
    pub fn connect_seconds(&self) -> u16 {
        u16::try_from(self.interval.as_secs()).unwrap_or(u16::MAX)
    }
}

/// What to do when the keepalive deadline fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    SendPing,
    /// The previous ping was never answered; the connection is dead.
    Timeout,
}

#[derive(Debug, Clone)]
pub struct KeepaliveTracker {
    config: KeepaliveConfig,
    awaiting_pingresp: bool,
}

impl KeepaliveTracker {
    #[must_use]
    pub fn new(config: KeepaliveConfig) -> Self {
        Self {
            config,
            awaiting_pingresp: false,
        }
    }

    #[must_use]
    pub fn config(&self) -> &KeepaliveConfig {
        &self.config
    }

    /// Called when the ping deadline expires.
    pub fn on_deadline(&mut self) -> KeepaliveAction {
        if self.awaiting_pingresp {
            KeepaliveAction::Timeout
        } else {
            self.awaiting_pingresp = true;
            KeepaliveAction::SendPing
        }
    }

    pub fn on_pingresp(&mut self) {
        self.awaiting_pingresp = false;
    }

    /// Called after any outbound packet. Returns true when the deadline
    /// should be pushed back by a full interval.
    #[must_use]
    pub fn on_packet_sent(&self) -> bool {
        self.config.reschedule_on_send && !self.awaiting_pingresp
    }

    /// Fresh connection, no ping outstanding.
    pub fn reset(&mut self) {
        self.awaiting_pingresp = false;
    }

    #[must_use]
    pub fn awaiting_pingresp(&self) -> bool {
        self.awaiting_pingresp
    }
}

//! Subscription bookkeeping across reconnects.
//!
//! The tracker remembers every filter the session successfully subscribed to
//! so the connection manager can replay them after a reconnect that did not
//! resume a server-side session. Grants are applied only when the matching
//! SUBACK arrives; rejected filters never enter the active set.

use crate::packet::{SubAckCode, SubscribeFilter};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ResubscribeTracker {
    /// Granted subscriptions in the order they were first established.
    active: Vec<SubscribeFilter>,
    /// SUBSCRIBE requests awaiting their SUBACK, keyed by message id.
    pending_subscribe: HashMap<u16, Vec<SubscribeFilter>>,
    /// UNSUBSCRIBE requests awaiting their UNSUBACK.
    pending_unsubscribe: HashMap<u16, Vec<String>>,
}

impl ResubscribeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `filter` is already granted at exactly `qos`. Such a request
    /// is a no-op for the broker's subscription state.
    #[must_use]
    pub fn is_duplicate(&self, filter: &SubscribeFilter) -> bool {
        self.active
            .iter()
            .any(|f| f.filter == filter.filter && f.qos == filter.qos)
    }

    pub fn record_subscribe(&mut self, message_id: u16, filters: Vec<SubscribeFilter>) {
        self.pending_subscribe.insert(message_id, filters);
    }

    /// Applies the grants of a SUBACK to the pending request. Filters the
    /// broker rejected are dropped; re-granted filters update their QoS in
    /// place. Returns false for an unknown message id.
    pub fn complete_subscribe(&mut self, message_id: u16, grants: &[SubAckCode]) -> bool {
        let Some(filters) = self.pending_subscribe.remove(&message_id) else {
            return false;
        };

        for (requested, grant) in filters.into_iter().zip(grants) {
            let Some(granted_qos) = grant.granted_qos() else {
                continue;
            };
            match self
                .active
                .iter_mut()
                .find(|f| f.filter == requested.filter)
            {
                Some(existing) => existing.qos = granted_qos,
                None => self.active.push(SubscribeFilter {
                    filter: requested.filter,
                    qos: granted_qos,
                }),
            }
        }
        true
    }

    pub fn record_unsubscribe(&mut self, message_id: u16, filters: Vec<String>) {
        self.pending_unsubscribe.insert(message_id, filters);
    }

    /// Drops the named filters from the active set once the UNSUBACK lands.
    /// Returns false for an unknown message id.
    pub fn complete_unsubscribe(&mut self, message_id: u16) -> bool {
        let Some(filters) = self.pending_unsubscribe.remove(&message_id) else {
            return false;
        };
        self.active.retain(|f| !filters.contains(&f.filter));
        true
    }

    /// Forgets a pending request without touching the active set (the request
    /// was cancelled or its connection died before the ack).
    pub fn abandon(&mut self, message_id: u16) {
        self.pending_subscribe.remove(&message_id);
        self.pending_unsubscribe.remove(&message_id);
    }

    /// The filters to replay on a fresh session, in first-subscribed order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubscribeFilter> {
        self.active.clone()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.pending_subscribe.clear();
        self.pending_unsubscribe.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QoS;

    fn filters(specs: &[(&str, QoS)]) -> Vec<SubscribeFilter> {
        specs
            .iter()
            .map(|(f, q)| SubscribeFilter::new(*f, *q))
            .collect()
    }

    #[test]
    fn grants_enter_active_set() {
        let mut tracker = ResubscribeTracker::new();
        tracker.record_subscribe(1, filters(&[("a/b", QoS::AtLeastOnce), ("c/#", QoS::ExactlyOnce)]));
        assert_eq!(tracker.active_count(), 0);

        assert!(tracker.complete_subscribe(
            1,
            &[
                SubAckCode::Granted(QoS::AtLeastOnce),
                SubAckCode::Granted(QoS::AtLeastOnce),
            ],
        ));
        assert_eq!(
            tracker.snapshot(),
            filters(&[("a/b", QoS::AtLeastOnce), ("c/#", QoS::AtLeastOnce)])
        );
    }

    #[test]
    fn rejected_filters_stay_out() {
        let mut tracker = ResubscribeTracker::new();
        tracker.record_subscribe(1, filters(&[("ok", QoS::AtMostOnce), ("denied", QoS::ExactlyOnce)]));
        tracker.complete_subscribe(
            1,
            &[SubAckCode::Granted(QoS::AtMostOnce), SubAckCode::Failure],
        );
        assert_eq!(tracker.snapshot(), filters(&[("ok", QoS::AtMostOnce)]));
    }

    #[test]
    fn resubscribe_updates_qos_in_place() {
        let mut tracker = ResubscribeTracker::new();
        tracker.record_subscribe(1, filters(&[("a", QoS::AtMostOnce)]));
        tracker.complete_subscribe(1, &[SubAckCode::Granted(QoS::AtMostOnce)]);

        tracker.record_subscribe(2, filters(&[("a", QoS::ExactlyOnce)]));
        tracker.complete_subscribe(2, &[SubAckCode::Granted(QoS::ExactlyOnce)]);

        assert_eq!(tracker.snapshot(), filters(&[("a", QoS::ExactlyOnce)]));
    }

    #[test]
    fn duplicate_detection_is_exact() {
        let mut tracker = ResubscribeTracker::new();
        tracker.record_subscribe(1, filters(&[("a/b", QoS::AtLeastOnce)]));
        tracker.complete_subscribe(1, &[SubAckCode::Granted(QoS::AtLeastOnce)]);

        assert!(tracker.is_duplicate(&SubscribeFilter::new("a/b", QoS::AtLeastOnce)));
        // a different QoS is a real upgrade request
        assert!(!tracker.is_duplicate(&SubscribeFilter::new("a/b", QoS::ExactlyOnce)));
        assert!(!tracker.is_duplicate(&SubscribeFilter::new("a/c", QoS::AtLeastOnce)));
    }

    #[test]
    fn unsubscribe_removes_filters() {
        let mut tracker = ResubscribeTracker::new();
        tracker.record_subscribe(1, filters(&[("a", QoS::AtMostOnce), ("b", QoS::AtMostOnce)]));
        tracker.complete_subscribe(
            1,
            &[SubAckCode::Granted(QoS::AtMostOnce), SubAckCode::Granted(QoS::AtMostOnce)],
        );

        tracker.record_unsubscribe(2, vec!["a".into()]);
        assert!(tracker.complete_unsubscribe(2));
        assert_eq!(tracker.snapshot(), filters(&[("b", QoS::AtMostOnce)]));
    }

    #[test]
    fn unknown_acks_are_reported() {
        let mut tracker = ResubscribeTracker::new();
        assert!(!tracker.complete_subscribe(9, &[SubAckCode::Failure]));
        assert!(!tracker.complete_unsubscribe(9));
    }

    #[test]
    fn abandon_discards_pending_only() {
        let mut tracker = ResubscribeTracker::new();
        tracker.record_subscribe(1, filters(&[("a", QoS::AtMostOnce)]));
        tracker.complete_subscribe(1, &[SubAckCode::Granted(QoS::AtMostOnce)]);
        tracker.record_subscribe(2, filters(&[("b", QoS::AtMostOnce)]));

        tracker.abandon(2);
        assert!(!tracker.complete_subscribe(2, &[SubAckCode::Granted(QoS::AtMostOnce)]));
        assert_eq!(tracker.active_count(), 1);
    }
}

//! Notification fan-out.
//!
//! Live delivery is a tokio broadcast channel: at-most-once, and a
//! subscriber that is not connected (or lags past the channel capacity)
//! misses the update for good. A bounded ring of recent updates lets a
//! reconnecting client catch up through the query API instead.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use trc_config::NotifyConfig;
use trc_schemas::ReconciliationUpdate;

/// Messages carried on the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    ReconciliationUpdate(ReconciliationUpdate),
}

impl BusMsg {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::ReconciliationUpdate(_) => "reconciliation_update",
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    bus: broadcast::Sender<BusMsg>,
    recent: Arc<Mutex<VecDeque<ReconciliationUpdate>>>,
    recent_capacity: usize,
}

impl Notifier {
    pub fn new(channel_capacity: usize, recent_capacity: usize) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(channel_capacity.max(1));
        Self {
            bus,
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(recent_capacity))),
            recent_capacity,
        }
    }

    pub fn from_config(cfg: &NotifyConfig) -> Self {
        Self::new(cfg.channel_capacity, cfg.recent_capacity)
    }

    /// Broadcast one finalized outcome. Returns the number of live
    /// subscribers it reached (0 is not an error).
    pub fn publish(&self, update: ReconciliationUpdate) -> usize {
        if self.recent_capacity > 0 {
            let mut ring = self.recent.lock().unwrap_or_else(|p| p.into_inner());
            if ring.len() == self.recent_capacity {
                ring.pop_front();
            }
            ring.push_back(update.clone());
        }
        self.bus
            .send(BusMsg::ReconciliationUpdate(update))
            .unwrap_or(0)
    }

    pub fn heartbeat(&self, ts_millis: i64) {
        let _ = self.bus.send(BusMsg::Heartbeat { ts_millis });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMsg> {
        self.bus.subscribe()
    }

    /// Recent updates, newest first.
    pub fn recent(&self) -> Vec<ReconciliationUpdate> {
        let ring = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        ring.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trc_schemas::{FinalStatus, Scenario};

    fn update(id: &str) -> ReconciliationUpdate {
        ReconciliationUpdate {
            transaction_id: id.to_string(),
            final_status: FinalStatus::Matched,
            scenario: Scenario::PerfectMatch,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_update() {
        let n = Notifier::new(16, 4);
        let mut rx = n.subscribe();
        assert_eq!(n.publish(update("A")), 1);

        match rx.recv().await.unwrap() {
            BusMsg::ReconciliationUpdate(u) => assert_eq!(u.transaction_id, "A"),
            other => panic!("unexpected bus message: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_dropped_live_but_kept_in_ring() {
        let n = Notifier::new(16, 4);
        assert_eq!(n.publish(update("A")), 0);
        assert_eq!(n.recent(), vec![update("A")]);
    }

    #[test]
    fn late_subscriber_misses_earlier_updates() {
        let n = Notifier::new(16, 4);
        n.publish(update("A"));
        let mut rx = n.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ring_is_bounded_and_newest_first() {
        let n = Notifier::new(16, 2);
        for id in ["A", "B", "C"] {
            n.publish(update(id));
        }
        let ids: Vec<String> = n.recent().into_iter().map(|u| u.transaction_id).collect();
        assert_eq!(ids, vec!["C", "B"]);
    }

    #[test]
    fn update_serializes_with_type_tag() {
        let v = serde_json::to_value(BusMsg::ReconciliationUpdate(update("A"))).unwrap();
        assert_eq!(v["type"], "reconciliation_update");
        assert_eq!(v["transactionId"], "A");
        assert_eq!(BusMsg::Heartbeat { ts_millis: 1 }.event_name(), "heartbeat");
    }
}

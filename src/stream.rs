// =============================================================================
// Trade Stream Bus: in-process pub/sub with ring catch-up
// =============================================================================
//
// Publishers call `publish`; subscribers register a filter and receive:
//   1. A synchronous catch-up snapshot of the most recent matching events
//      (newest first, capped).
//   2. Live events as they are published, in publish order.
//
// Delivery never blocks publishers: a slow subscriber's oldest undelivered
// events are dropped by the broadcast channel and surface as a lag count on
// its subscription. Event ids are assigned by the bus and strictly increase,
// so catch-up and live delivery are stitched together without duplicates.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{EventKind, TradeStreamEvent};

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// Per-kind payload structs for the closed event taxonomy. The envelope's
/// `type` field is the discriminator; these are what publishers put in
/// `payload`.
pub mod payload {
    use serde::Serialize;

    use crate::breakers::CircuitBreakerActivation;
    use crate::types::{ExecutionDetails, TradingDecision};

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RoundStarted {
        pub round_id: String,
        pub symbols: Vec<String>,
        pub captured_at: String,
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RoundCompleted {
        pub round_id: String,
        pub consensus: String,
        pub decisions: usize,
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AgentDecision {
        pub round_id: String,
        pub entry_id: String,
        pub decision: TradingDecision,
        pub composite: f64,
        pub intent_category: String,
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TradeExecuted {
        pub round_id: String,
        pub entry_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub details: Option<ExecutionDetails>,
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TradeBlocked {
        pub round_id: String,
        pub entry_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub reason: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub activations: Vec<CircuitBreakerActivation>,
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CircuitBreaker {
        pub round_id: String,
        pub activation: CircuitBreakerActivation,
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Subscriber-side event filter. Empty fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub types: Option<Vec<EventKind>>,
    pub agent_ids: Option<Vec<String>>,
}

impl EventFilter {
    pub fn matches(&self, event: &TradeStreamEvent) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&event.kind) {
                return false;
            }
        }
        if let Some(agent_ids) = &self.agent_ids {
            match &event.agent_id {
                Some(id) if agent_ids.iter().any(|a| a == id) => {}
                _ => return false,
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Single-process pub/sub bus with a bounded ring of recent events.
pub struct TradeStreamBus {
    capacity: usize,
    catch_up_limit: usize,
    next_id: AtomicU64,
    /// Recent events, newest first.
    ring: RwLock<VecDeque<TradeStreamEvent>>,
    tx: broadcast::Sender<TradeStreamEvent>,
}

impl TradeStreamBus {
    pub fn new(capacity: usize, catch_up_limit: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self {
            capacity,
            catch_up_limit,
            next_id: AtomicU64::new(1),
            ring: RwLock::new(VecDeque::new()),
            tx,
        }
    }

    /// Publish one event; returns it with its assigned id.
    pub fn publish<P: Serialize>(
        &self,
        kind: EventKind,
        agent_id: Option<String>,
        payload: &P,
    ) -> TradeStreamEvent {
        let event = TradeStreamEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            kind,
            agent_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        };

        {
            let mut ring = self.ring.write();
            ring.push_front(event.clone());
            while ring.len() > self.capacity {
                ring.pop_back();
            }
        }

        // No receivers is fine; the ring still records the event.
        let _ = self.tx.send(event.clone());

        debug!(id = event.id, kind = %event.kind, "stream event published");
        event
    }

    /// Subscribe with a filter. The returned subscription carries the
    /// catch-up snapshot and then yields live events.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        // Hold the ring lock across receiver creation so an event is either
        // in the snapshot or delivered live, never lost between the two.
        let ring = self.ring.read();
        let rx = self.tx.subscribe();
        let last_ring_id = ring.front().map(|e| e.id).unwrap_or(0);
        let catch_up: Vec<TradeStreamEvent> = ring
            .iter()
            .filter(|e| filter.matches(e))
            .take(self.catch_up_limit)
            .cloned()
            .collect();
        drop(ring);

        Subscription {
            catch_up,
            filter,
            rx,
            last_seen_id: last_ring_id,
            dropped: 0,
        }
    }

    /// Polling access to recent events, newest first.
    pub fn recent(
        &self,
        filter: &EventFilter,
        limit: usize,
        since_id: Option<u64>,
    ) -> Vec<TradeStreamEvent> {
        self.ring
            .read()
            .iter()
            .filter(|e| filter.matches(e))
            .filter(|e| since_id.map_or(true, |since| e.id > since))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of events currently retained in the ring.
    pub fn ring_len(&self) -> usize {
        self.ring.read().len()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// One subscriber's view of the stream.
pub struct Subscription {
    /// Snapshot of recent matching events at subscribe time, newest first.
    pub catch_up: Vec<TradeStreamEvent>,
    filter: EventFilter,
    rx: broadcast::Receiver<TradeStreamEvent>,
    /// Newest ring id at subscribe time; live delivery skips anything at or
    /// below it (already covered by the snapshot window).
    last_seen_id: u64,
    /// Events lost to channel lag for this subscriber.
    pub dropped: u64,
}

impl Subscription {
    /// Await the next live event matching the filter.
    ///
    /// Returns `None` once the bus is gone. Lagged events increment
    /// `dropped` and delivery continues from the oldest retained event.
    pub async fn next_event(&mut self) -> Option<TradeStreamEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.id <= self.last_seen_id {
                        continue;
                    }
                    self.last_seen_id = event.id;
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decision_filter() -> EventFilter {
        EventFilter {
            types: Some(vec![EventKind::AgentDecision]),
            agent_ids: None,
        }
    }

    #[test]
    fn ring_caps_and_orders_newest_first() {
        let bus = TradeStreamBus::new(5, 20);
        for i in 0..8 {
            bus.publish(EventKind::AgentDecision, None, &json!({ "i": i }));
        }
        assert_eq!(bus.ring_len(), 5);
        let recent = bus.recent(&EventFilter::default(), 50, None);
        let ids: Vec<u64> = recent.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![8, 7, 6, 5, 4]);
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let bus = TradeStreamBus::new(100, 20);
        let a = bus.publish(EventKind::RoundStarted, None, &json!({}));
        let b = bus.publish(EventKind::RoundCompleted, None, &json!({}));
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn catch_up_then_live_delivery() {
        let bus = TradeStreamBus::new(300, 20);
        for i in 0..25 {
            bus.publish(
                EventKind::AgentDecision,
                Some("atlas".into()),
                &json!({ "i": i }),
            );
        }
        // Noise the filter must hide.
        bus.publish(EventKind::RoundCompleted, None, &json!({}));

        let mut sub = bus.subscribe(decision_filter());

        // 20 most recent decisions, newest first.
        assert_eq!(sub.catch_up.len(), 20);
        assert_eq!(sub.catch_up.first().unwrap().id, 25);
        assert_eq!(sub.catch_up.last().unwrap().id, 6);

        // A live event arrives exactly once, after the snapshot.
        let live = bus.publish(EventKind::AgentDecision, Some("atlas".into()), &json!({}));
        let received = sub.next_event().await.unwrap();
        assert_eq!(received.id, live.id);
    }

    #[tokio::test]
    async fn filter_hides_non_matching_live_events() {
        let bus = TradeStreamBus::new(300, 20);
        let mut sub = bus.subscribe(EventFilter {
            types: Some(vec![EventKind::TradeExecuted]),
            agent_ids: Some(vec!["cipher".into()]),
        });

        bus.publish(EventKind::TradeExecuted, Some("atlas".into()), &json!({}));
        bus.publish(EventKind::AgentDecision, Some("cipher".into()), &json!({}));
        let wanted = bus.publish(EventKind::TradeExecuted, Some("cipher".into()), &json!({}));

        let received = sub.next_event().await.unwrap();
        assert_eq!(received.id, wanted.id);
    }

    #[test]
    fn recent_respects_since_and_limit() {
        let bus = TradeStreamBus::new(300, 20);
        for _ in 0..10 {
            bus.publish(EventKind::AgentDecision, None, &json!({}));
        }
        let page = bus.recent(&EventFilter::default(), 3, Some(4));
        assert_eq!(page.len(), 3);
        assert!(page.iter().all(|e| e.id > 4));
        assert_eq!(page[0].id, 10);
    }

    #[test]
    fn empty_bus_yields_empty_catch_up() {
        let bus = TradeStreamBus::new(300, 20);
        let sub = bus.subscribe(EventFilter::default());
        assert!(sub.catch_up.is_empty());
    }
}

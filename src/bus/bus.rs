//! Per-mode publish/subscribe fan-out.
//!
//! Grounded on the per-key fan-out registry shape of `hut8-soar`'s
//! `FixBroadcaster` (`Arc<RwLock<HashMap<String, broadcast::Sender<LiveFix>>>>`
//! in `live_fixes.rs`), generalized from per-aircraft broadcast channels to
//! per-mode fan-out with bounded, drop-oldest, independently-failable
//! subscriber queues: `tokio::sync::broadcast` lags the *whole* receiver on
//! overflow, which is the wrong primitive for per-subscriber isolation, so
//! each subscriber instead gets its own `flume::bounded` channel (flume is
//! already a teacher dependency, used the same bounded-fast-path way in
//! `persistent_queue.rs`) whose `try_send` failure becomes the
//! drop-this-subscriber-only path.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// An event published on a bus: a `(event_type, json_payload)` pair framed
/// by the HTTP layer as `event: <type>\ndata: <json>\n\n`.
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl BusEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

struct SubscriberEntry {
    sender: flume::Sender<BusEvent>,
    dropped: AtomicU64,
}

/// One consumer's view onto a bus.
pub struct Subscription {
    pub id: Uuid,
    pub receiver: flume::Receiver<BusEvent>,
    bus: std::sync::Weak<BusInner>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

struct BusInner {
    backlog: Mutex<VecDeque<BusEvent>>,
    backlog_capacity: usize,
    subscribers: Mutex<std::collections::HashMap<Uuid, SubscriberEntry>>,
    subscriber_capacity: usize,
    subscriber_backlog: usize,
}

impl BusInner {
    fn unsubscribe(&self, id: Uuid) {
        self.subscribers.lock().expect("bus mutex poisoned").remove(&id);
        debug!(subscriber = %id, "subscription released");
    }
}

/// `Bus[M]`: one bounded FIFO plus a set of independent subscriber queues.
pub struct Bus {
    inner: std::sync::Arc<BusInner>,
}

impl Bus {
    pub fn new(backlog_capacity: usize, subscriber_capacity: usize, subscriber_backlog: usize) -> Self {
        Self {
            inner: std::sync::Arc::new(BusInner {
                backlog: Mutex::new(VecDeque::with_capacity(backlog_capacity)),
                backlog_capacity,
                subscribers: Mutex::new(std::collections::HashMap::new()),
                subscriber_capacity,
                subscriber_backlog,
            }),
        }
    }

    /// Append to the backlog with drop-oldest, then attempt a non-blocking
    /// send to every live subscriber. Never blocks.
    pub fn publish(&self, event: BusEvent) {
        {
            let mut backlog = self.inner.backlog.lock().expect("bus mutex poisoned");
            if backlog.len() >= self.inner.backlog_capacity {
                backlog.pop_front();
                metrics::counter!("bus.backlog.dropped").increment(1);
            }
            backlog.push_back(event.clone());
        }

        let subscribers = self.inner.subscribers.lock().expect("bus mutex poisoned");
        for entry in subscribers.values() {
            if entry.sender.try_send(event.clone()).is_err() {
                entry.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("bus.subscriber.dropped").increment(1);
            }
        }
    }

    /// Register a new subscription. The subscriber's delivery queue is
    /// pre-seeded with up to `subscriber_backlog` of the most recent events
    /// so a cold start can render existing state immediately.
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = flume::bounded(self.inner.subscriber_capacity);

        {
            let backlog = self.inner.backlog.lock().expect("bus mutex poisoned");
            let tail_start = backlog.len().saturating_sub(self.inner.subscriber_backlog);
            for event in backlog.iter().skip(tail_start) {
                let _ = tx.try_send(event.clone());
            }
        }

        self.inner.subscribers.lock().expect("bus mutex poisoned").insert(
            id,
            SubscriberEntry {
                sender: tx,
                dropped: AtomicU64::new(0),
            },
        );

        Subscription {
            id,
            receiver: rx,
            bus: std::sync::Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().expect("bus mutex poisoned").len()
    }

    pub fn dropped_count(&self, id: Uuid) -> Option<u64> {
        self.inner
            .subscribers
            .lock()
            .expect("bus mutex poisoned")
            .get(&id)
            .map(|e| e.dropped.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fan_out_delivers_to_every_subscriber() {
        let bus = Bus::new(1000, 256, 50);
        let sub_a = bus.subscribe();
        let sub_b = bus.subscribe();

        bus.publish(BusEvent::new("aircraft", json!({"icao": "A0B1C2"})));

        assert_eq!(sub_a.receiver.try_recv().unwrap().event_type, "aircraft");
        assert_eq!(sub_b.receiver.try_recv().unwrap().event_type, "aircraft");
    }

    #[test]
    fn slow_subscriber_drops_without_blocking_others() {
        let bus = Bus::new(1000, 4, 0);
        let slow = bus.subscribe();
        let fast = bus.subscribe();

        for i in 0..20 {
            bus.publish(BusEvent::new("x", json!({"i": i})));
        }

        // fast never drains either, but publish must not have blocked or panicked
        assert!(bus.dropped_count(slow.id).unwrap() > 0);
        assert!(bus.dropped_count(fast.id).unwrap() > 0);
    }

    #[test]
    fn backlog_drop_oldest_bounds_size() {
        let bus = Bus::new(3, 256, 50);
        for i in 0..10 {
            bus.publish(BusEvent::new("x", json!({"i": i})));
        }
        let sub = bus.subscribe();
        // subscriber backlog seed draws from the tail, capped by backlog capacity (3)
        let mut seen = Vec::new();
        while let Ok(event) = sub.receiver.try_recv() {
            seen.push(event.payload["i"].as_i64().unwrap());
        }
        assert_eq!(seen, vec![7, 8, 9]);
    }

    #[test]
    fn unsubscribe_on_drop_removes_entry() {
        let bus = Bus::new(1000, 256, 50);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn cold_start_backlog_seeds_new_subscriber() {
        let bus = Bus::new(1000, 256, 2);
        bus.publish(BusEvent::new("x", json!({"i": 1})));
        bus.publish(BusEvent::new("x", json!({"i": 2})));
        bus.publish(BusEvent::new("x", json!({"i": 3})));

        let sub = bus.subscribe();
        let first = sub.receiver.try_recv().unwrap();
        let second = sub.receiver.try_recv().unwrap();
        assert_eq!(first.payload["i"], json!(2));
        assert_eq!(second.payload["i"], json!(3));
        assert!(sub.receiver.try_recv().is_err());
    }
}

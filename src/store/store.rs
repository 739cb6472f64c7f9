//! A keyed, TTL-evicting data store for one decoder mode.
//!
//! One mutex per store, matching the single-lock-per-shared-resource
//! discipline of `ConnectionStatusPublisher`; eviction runs under the same
//! lock so it cannot interleave destructively with an upsert.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Map;
use serde_json::Value;

use super::records::StoreRecord;

/// `Store[M]`: a keyed mapping from entity key to normalized record, with
/// mode-specific TTL-based eviction.
pub struct Store {
    entries: Mutex<HashMap<String, StoreRecord>>,
    ttl: chrono::Duration,
}

impl Store {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: chrono::Duration::seconds(ttl_seconds as i64),
        }
    }

    /// Merge `partial` into the entry for `key`, creating it if absent.
    /// Updates `last_seen = now`.
    pub fn upsert(&self, key: &str, partial: Map<String, Value>, now: DateTime<Utc>) -> StoreRecord {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let record = entries
            .entry(key.to_string())
            .or_insert_with(|| StoreRecord::new(key, Map::new(), now));
        record.merge(&partial, now);
        record.clone()
    }

    pub fn get(&self, key: &str) -> Option<StoreRecord> {
        self.entries.lock().expect("store mutex poisoned").get(key).cloned()
    }

    /// Stable, point-in-time copy of every live entry.
    pub fn snapshot(&self) -> Vec<StoreRecord> {
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Delete every entry whose `last_seen` is older than the store's TTL.
    /// Returns the number of entries evicted.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let ttl = self.ttl;
        let before = entries.len();
        entries.retain(|_, record| !record.is_expired(now, ttl));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn the single periodic eviction task for `store`, the same
/// `tokio::time::interval`-loop shape as `process_metrics_task`, generalized
/// to a sweep instead of a gauge refresh.
pub fn spawn_eviction_task(
    store: std::sync::Arc<Store>,
    interval_seconds: u64,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = store.evict_expired(Utc::now());
                    if evicted > 0 {
                        tracing::debug!(evicted, "store eviction swept expired records");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn upsert_then_get() {
        let store = Store::new(300);
        let now = Utc::now();
        store.upsert("A0B1C2", obj(json!({"altitude_ft": 4500})), now);
        let record = store.get("A0B1C2").unwrap();
        assert_eq!(record.fields.get("altitude_ft"), Some(&json!(4500)));
    }

    #[test]
    fn snapshot_is_stable_copy() {
        let store = Store::new(300);
        let now = Utc::now();
        store.upsert("A", obj(json!({"x": 1})), now);
        store.upsert("B", obj(json!({"x": 2})), now);
        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn evict_expired_respects_ttl_boundary() {
        let store = Store::new(300);
        let t0 = Utc::now();
        store.upsert("A0B1C2", obj(json!({"x": 1})), t0);

        assert_eq!(store.evict_expired(t0 + chrono::Duration::seconds(299)), 0);
        assert!(store.get("A0B1C2").is_some());

        assert_eq!(store.evict_expired(t0 + chrono::Duration::seconds(301)), 1);
        assert!(store.get("A0B1C2").is_none());
    }

    #[test]
    fn merge_preservation_property() {
        let store = Store::new(300);
        let now = Utc::now();
        store.upsert("k", obj(json!({"a": 1})), now);
        store.upsert("k", obj(json!({"b": 2})), now);
        let record = store.get("k").unwrap();
        assert_eq!(record.fields.get("a"), Some(&json!(1)));
        assert_eq!(record.fields.get("b"), Some(&json!(2)));

        store.upsert("k", obj(json!({"a": 3})), now);
        let record = store.get("k").unwrap();
        assert_eq!(record.fields.get("a"), Some(&json!(3)));
        assert_eq!(record.fields.get("b"), Some(&json!(2)));
    }
}

//! The neutral, mode-agnostic record envelope every store holds.
//!
//! Grounded on the JSON-envelope shape `live_fixes.rs`'s `LiveFix` uses
//! before broadcasting: a record is a flat map of named fields plus a
//! `last_seen` timestamp, so field-level overlay merge is one generic
//! operation shared by every mode rather than twenty hand-written structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A normalized record keyed by the mode's entity key (ICAO hex, MMSI,
/// BSSID, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreRecord {
    pub key: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub last_seen: DateTime<Utc>,
}

impl StoreRecord {
    pub fn new(key: impl Into<String>, fields: Map<String, Value>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            fields,
            last_seen: now,
        }
    }

    /// Overlay `partial` onto `self`: new non-null values win, prior values
    /// survive omission. `last_seen` is always bumped to `now`.
    pub fn merge(&mut self, partial: &Map<String, Value>, now: DateTime<Utc>) {
        for (k, v) in partial {
            if !v.is_null() {
                self.fields.insert(k.clone(), v.clone());
            }
        }
        self.last_seen = now;
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_seen) > ttl
    }
}

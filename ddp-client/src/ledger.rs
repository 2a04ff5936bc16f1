//! Pending-change ledger for local-echo suppression.
//!
//! When a caller mutates a document and the server echoes the same change
//! back, forwarding the echo to collaborators would re-apply a change they
//! already hold. The ledger records the last locally-applied field set per
//! `(collection, id)`; an inbound `changed` whose fields compare equal by
//! value consumes the entry and is suppressed. Entries expire after a TTL.
//!
//! This is a heuristic dedup, not a CRDT: reordered echoes can defeat it.
//! It is off by default (see `ConnectConfig::dedup_local_changes`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

struct LedgerEntry {
    fields: Value,
    recorded_at: Instant,
}

pub struct ChangeLedger {
    entries: HashMap<(String, String), LedgerEntry>,
    ttl: Duration,
}

impl ChangeLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Record the field set just applied locally to `(collection, id)`.
    /// A newer local change for the same document replaces the old entry.
    pub fn record(&mut self, collection: &str, id: &str, fields: Value) {
        self.evict_expired();
        self.entries.insert(
            (collection.to_string(), id.to_string()),
            LedgerEntry {
                fields,
                recorded_at: Instant::now(),
            },
        );
    }

    /// True when `fields` value-equals the recorded local change for this
    /// document; a match consumes the entry (removal-on-match).
    pub fn matches(&mut self, collection: &str, id: &str, fields: &Value) -> bool {
        self.evict_expired();
        let key = (collection.to_string(), id.to_string());
        match self.entries.get(&key) {
            Some(entry) if &entry.fields == fields => {
                self.entries.remove(&key);
                true
            }
            _ => false,
        }
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.recorded_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

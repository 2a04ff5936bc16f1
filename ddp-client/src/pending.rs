//! Request correlation tables.
//!
//! Three disjoint instances of the same concept track in-flight requests:
//! method results, subscription-ready callbacks, and unsubscribe-complete
//! callbacks. Each id holds at most one completion, and a completion is
//! handed out at most once; resolution removes the entry atomically with
//! respect to the dispatch lane, so a duplicate reply is a no-op.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::RemoteError;

/// Completion for a method call: `(result-or-none, error-or-none)`.
pub type MethodCallback = Box<dyn FnOnce(Option<Value>, Option<RemoteError>) + Send + 'static>;

/// One-shot completion fired when a subscription's `ready` arrives.
pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

/// Completion fired when `nosub` confirms an unsubscribe.
pub type UnsubCallback = Box<dyn FnOnce() + Send + 'static>;

/// A map from request id to a pending completion, satisfied at most once.
pub struct CorrelationTable<C> {
    entries: HashMap<String, C>,
}

impl<C> CorrelationTable<C> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a completion for `id`. Returns false (and drops the
    /// completion) if the id already has one.
    pub fn register(&mut self, id: impl Into<String>, completion: C) -> bool {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, completion);
        true
    }

    /// Remove and return the completion for `id`, if any.
    pub fn resolve(&mut self, id: &str) -> Option<C> {
        self.entries.remove(id)
    }

    /// Drop every pending entry without invoking it; returns how many were
    /// dropped. Used on explicit disconnect.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for CorrelationTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

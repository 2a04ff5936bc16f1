//! Tracked subscription state.
//!
//! Subscriptions are owned by the connection/dispatcher pair: created when a
//! `sub` frame is sent, flipped ready by `ready`, and destroyed only when a
//! clean `nosub` confirms removal. Lookup is by id (primary) or by name
//! (linear scan; names are not unique because parameterized subscriptions
//! may share one).

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    /// Params from the original `sub` frame, preserved for re-subscription
    /// after a reconnect.
    pub params: Option<Vec<Value>>,
    pub ready: bool,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    subs: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, name: impl Into<String>, params: Option<Vec<Value>>) {
        let id = id.into();
        self.subs.insert(
            id.clone(),
            Subscription {
                id,
                name: name.into(),
                params,
                ready: false,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&Subscription> {
        self.subs.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Subscription> {
        self.subs.remove(id)
    }

    /// Flip `ready` for `id`; returns the subscription name when tracked.
    pub fn mark_ready(&mut self, id: &str) -> Option<String> {
        let sub = self.subs.get_mut(id)?;
        sub.ready = true;
        Some(sub.name.clone())
    }

    /// Reset every subscription to not-ready (after a reconnect, readiness
    /// must be re-earned from the new session).
    pub fn mark_all_pending(&mut self) {
        for sub in self.subs.values_mut() {
            sub.ready = false;
        }
    }

    /// First tracked id carrying `name`, if any.
    pub fn first_id_by_name(&self, name: &str) -> Option<String> {
        self.subs
            .values()
            .find(|s| s.name == name)
            .map(|s| s.id.clone())
    }

    /// Snapshot of all tracked subscriptions (used for re-subscription).
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.subs.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ready_flip_and_removal() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert("s1", "AllStates", None);
        assert!(!reg.get("s1").unwrap().ready);

        assert_eq!(reg.mark_ready("s1").as_deref(), Some("AllStates"));
        assert!(reg.get("s1").unwrap().ready);

        assert_eq!(reg.mark_ready("unknown"), None);
        assert!(reg.remove("s1").is_some());
        assert!(reg.remove("s1").is_none());
    }

    #[test]
    fn name_lookup_with_duplicate_names() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert("a", "messages", Some(vec![json!("room-1")]));
        reg.insert("b", "messages", Some(vec![json!("room-2")]));
        reg.insert("c", "presence", None);

        let found = reg.first_id_by_name("messages").unwrap();
        assert!(found == "a" || found == "b");
        assert_eq!(reg.first_id_by_name("presence").as_deref(), Some("c"));
        assert_eq!(reg.first_id_by_name("nope"), None);
    }

    #[test]
    fn reconnect_resets_readiness_but_keeps_params() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert("a", "messages", Some(vec![json!("room-1")]));
        reg.mark_ready("a");

        reg.mark_all_pending();
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(!snap[0].ready);
        assert_eq!(snap[0].params, Some(vec![json!("room-1")]));
    }
}

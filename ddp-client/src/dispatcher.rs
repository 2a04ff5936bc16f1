//! Protocol dispatcher: the single serialized message-processing lane.
//!
//! Every decoded inbound frame flows through [`Dispatcher::process`] in
//! strict arrival order. That ordering is the load-bearing correctness
//! property of the whole client: document mutations must reach collaborators
//! in the sequence the server emitted them, and a `ready` is only meaningful
//! after every `added` it implies has been delivered. The dispatch lane is
//! one task draining one channel, never a pool.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use crate::client::ClientInner;
use crate::error::RemoteError;
use crate::event::Event;
use crate::message::{Message, MessageKind};

/// Items flowing over the dispatch lane. Transport closures travel the same
/// lane as frames so lifecycle events stay ordered behind any document
/// backlog that preceded them.
pub(crate) enum DispatchItem {
    Frame(Message),
    TransportClosed {
        code: Option<u16>,
        reason: String,
        clean: bool,
    },
}

pub(crate) struct Dispatcher {
    inner: Arc<ClientInner>,
}

impl Dispatcher {
    pub(crate) fn new(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub(crate) async fn run(self, mut rx: mpsc::UnboundedReceiver<DispatchItem>) {
        while let Some(item) = rx.recv().await {
            self.process(item);
        }
        tracing::debug!("dispatch lane stopped");
    }

    pub(crate) fn process(&self, item: DispatchItem) {
        match item {
            DispatchItem::Frame(msg) => self.handle(msg),
            DispatchItem::TransportClosed {
                code,
                reason,
                clean,
            } => self.on_transport_closed(code, reason, clean),
        }
    }

    /// Route one inbound message by type.
    fn handle(&self, msg: Message) {
        match msg.kind() {
            MessageKind::Connected => self.on_connected(&msg),
            MessageKind::Failed => {
                let suggested = msg.version().map(str::to_owned);
                tracing::warn!(suggested_version = ?suggested, "server rejected protocol version");
                self.inner.emit(Event::Failed {
                    suggested_version: suggested,
                });
            }
            MessageKind::Result => self.on_result(&msg),
            MessageKind::Updated => self.inner.emit(Event::MethodsUpdated {
                methods: msg.methods(),
            }),
            MessageKind::Added
            | MessageKind::Changed
            | MessageKind::Removed
            | MessageKind::AddedBefore
            | MessageKind::MovedBefore => self.on_document(&msg),
            MessageKind::Ready => self.on_ready(&msg),
            MessageKind::Nosub => self.on_nosub(&msg),
            // Normally intercepted on the transport lane; answered here too
            // for completeness.
            MessageKind::Ping => {
                let pong = match msg.id() {
                    Some(id) => json!({"msg": "pong", "id": id}),
                    None => json!({"msg": "pong"}),
                };
                let _ = self.inner.send_frame(&pong);
            }
            MessageKind::Pong => self.inner.record_pong(),
            MessageKind::Error => {
                self.inner.emit(Event::Error {
                    error: RemoteError::from_value(msg.value()),
                });
            }
            MessageKind::Unhandled => {
                tracing::debug!(msg = ?msg.msg(), "unhandled message, dropped");
            }
        }
    }

    /// `connected`: session established. Resolve connect waiters, re-issue
    /// the implicit framework subscription first, then every tracked
    /// subscription under its original id, and reset the backoff.
    fn on_connected(&self, msg: &Message) {
        let session = msg.session().unwrap_or_default().to_string();
        let resubs = {
            let mut shared = self.inner.shared.lock();
            shared.connected = true;
            shared.session_id = Some(session.clone());
            shared.subs.mark_all_pending();
            shared.subs.snapshot()
        };

        self.inner.backoff.lock().reset();
        let _ = self.inner.session_watch.send(Some(session.clone()));

        if let Some(name) = &self.inner.config.implicit_subscription {
            let frame = json!({"msg": "sub", "name": name, "id": self.inner.implicit_sub_id});
            let _ = self.inner.send_frame(&frame);
        }
        for sub in resubs {
            let mut frame = json!({"msg": "sub", "name": sub.name, "id": sub.id});
            if let Some(params) = sub.params {
                frame["params"] = Value::Array(params);
            }
            let _ = self.inner.send_frame(&frame);
        }

        if self.inner.config.auto_resume {
            match self.inner.resume_with_stored_token(None) {
                Ok(true) => tracing::debug!("resume login issued"),
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "resume login send failed"),
            }
        }

        tracing::info!(session = %session, "ddp session established");
        self.inner.emit(Event::Connected { session });
    }

    /// `result`: resolve the method correlation entry at most once. A result
    /// with no waiter is a diagnostic, not an error.
    fn on_result(&self, msg: &Message) {
        let Some(id) = msg.id() else {
            tracing::debug!("result frame without id, dropped");
            return;
        };
        // Resolve under a scoped lock; the completion runs with no lock
        // held and may re-enter the client API.
        let callback = { self.inner.shared.lock().methods.resolve(id) };
        match callback {
            Some(callback) => {
                let error = msg.error().map(RemoteError::from_value);
                let result = if error.is_some() {
                    None
                } else {
                    msg.result().cloned()
                };
                callback(result, error);
            }
            None => tracing::debug!(id, "result with no waiter, dropped"),
        }
    }

    /// Document mutations are forwarded verbatim; the dispatcher never
    /// interprets `fields`.
    fn on_document(&self, msg: &Message) {
        let (Some(collection), Some(id)) = (msg.collection(), msg.id()) else {
            tracing::debug!("document message missing collection/id, dropped");
            return;
        };
        let fields: Map<String, Value> = msg.fields().cloned().unwrap_or_default();

        match msg.kind() {
            MessageKind::Added => {
                for obs in self.inner.observers_for(collection) {
                    obs.on_added(collection, id, &fields);
                }
                self.inner.emit(Event::DocumentAdded {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    fields,
                });
            }
            MessageKind::Changed => {
                let cleared = msg.cleared();
                if self.inner.config.dedup_local_changes && cleared.is_empty() {
                    let echoed = Value::Object(fields.clone());
                    let suppressed = self
                        .inner
                        .shared
                        .lock()
                        .ledger
                        .matches(collection, id, &echoed);
                    if suppressed {
                        tracing::debug!(collection, id, "suppressed local-echo change");
                        return;
                    }
                }
                for obs in self.inner.observers_for(collection) {
                    obs.on_changed(collection, id, &fields, &cleared);
                }
                self.inner.emit(Event::DocumentChanged {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    fields,
                    cleared,
                });
            }
            MessageKind::Removed => {
                for obs in self.inner.observers_for(collection) {
                    obs.on_removed(collection, id);
                }
                self.inner.emit(Event::DocumentRemoved {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
            MessageKind::AddedBefore => {
                for obs in self.inner.observers_for(collection) {
                    obs.on_added(collection, id, &fields);
                }
                self.inner.emit(Event::DocumentAddedBefore {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    fields,
                    before: msg.before().map(str::to_owned),
                });
            }
            MessageKind::MovedBefore => {
                self.inner.emit(Event::DocumentMovedBefore {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    before: msg.before().map(str::to_owned),
                });
            }
            _ => unreachable!("on_document only receives document kinds"),
        }
    }

    /// `ready`: a registered one-shot callback takes precedence over the
    /// tracked-subscription path; the tracked path is skipped for that
    /// event.
    fn on_ready(&self, msg: &Message) {
        for sub_id in msg.subs() {
            let (one_shot, tracked_name) = {
                let mut shared = self.inner.shared.lock();
                match shared.sub_ready.resolve(&sub_id) {
                    Some(cb) => (Some(cb), None),
                    None => (None, shared.subs.mark_ready(&sub_id)),
                }
            };
            if let Some(cb) = one_shot {
                cb();
            } else if let Some(name) = tracked_name {
                self.inner.emit(Event::SubscriptionReady { id: sub_id, name });
            } else {
                tracing::debug!(id = %sub_id, "ready for unknown subscription");
            }
        }
    }

    /// `nosub`: a present, non-empty error means the subscription was NOT
    /// cleanly removed; surface the error and leave the tracked entry and
    /// any pending unsubscribe callback in place. An absent or empty error
    /// object confirms removal.
    fn on_nosub(&self, msg: &Message) {
        let Some(id) = msg.id() else {
            tracing::debug!("nosub frame without id, dropped");
            return;
        };
        if let Some(raw) = msg.error() {
            let error = RemoteError::from_value(raw);
            if !error.is_empty() {
                tracing::warn!(id, error = %error, "nosub with error");
                self.inner.emit(Event::Error { error });
                return;
            }
        }
        let (callback, removed) = {
            let mut shared = self.inner.shared.lock();
            (shared.unsub_done.resolve(id), shared.subs.remove(id))
        };
        if let Some(cb) = callback {
            cb();
        } else if let Some(sub) = removed {
            self.inner.emit(Event::SubscriptionRemoved {
                id: sub.id,
                name: sub.name,
            });
        }
    }

    fn on_transport_closed(&self, code: Option<u16>, reason: String, clean: bool) {
        let was_connected = {
            let mut shared = self.inner.shared.lock();
            let was = shared.connected;
            shared.connected = false;
            shared.session_id = None;
            was
        };
        let _ = self.inner.session_watch.send(None);
        tracing::info!(?code, %reason, clean, was_connected, "websocket closed");
        self.inner.emit(Event::WebsocketClosed {
            code,
            reason,
            clean,
        });
        if was_connected {
            self.inner.emit(Event::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::{test_client, test_client_with};
    use crate::client::ConnectConfig;
    use crate::event::CollectionObserver;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn frame(text: &str) -> DispatchItem {
        DispatchItem::Frame(Message::parse(text))
    }

    #[test]
    fn connected_emits_event_and_resubscribes_with_implicit_first() {
        let (client, mut events, mut out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        let sub_id = client
            .subscribe("AllStates", Some(vec![json!("param-1")]), None)
            .unwrap();
        assert!(out.try_recv().is_err(), "no frames before the handshake");

        dispatcher.process(frame(r#"{"msg":"connected","session":"sess-1"}"#));

        // Implicit framework subscription goes out first, then the tracked
        // one under its original id, exactly once.
        let first: Value = serde_json::from_str(&out.try_recv().unwrap()).unwrap();
        assert_eq!(first["name"], json!("meteor_autoupdate_clientVersions"));
        let second: Value = serde_json::from_str(&out.try_recv().unwrap()).unwrap();
        assert_eq!(second["msg"], json!("sub"));
        assert_eq!(second["id"], json!(sub_id));
        assert_eq!(second["params"], json!(["param-1"]));
        assert!(out.try_recv().is_err(), "sub id must not be sent twice");

        match events.try_recv().unwrap() {
            Event::Connected { session } => assert_eq!(session, "sess-1"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(client.is_connected());
        assert_eq!(client.session_id().as_deref(), Some("sess-1"));
    }

    #[test]
    fn document_mutations_preserve_arrival_order() {
        let (client, mut events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        dispatcher.process(frame(
            r#"{"collection":"test-collection","id":"2gAMzqvE8K8kBWK8F","fields":{"state":"MA","city":"Boston"},"msg":"added"}"#,
        ));
        dispatcher.process(frame(
            r#"{"msg":"changed","collection":"test-collection","id":"2gAMzqvE8K8kBWK8F","fields":{"city":"Cambridge"}}"#,
        ));
        dispatcher.process(frame(
            r#"{"msg":"removed","id":"2gAMzqvE8K8kBWK8F","collection":"test-collection"}"#,
        ));

        match events.try_recv().unwrap() {
            Event::DocumentAdded {
                collection,
                id,
                fields,
            } => {
                assert_eq!(collection, "test-collection");
                assert_eq!(id, "2gAMzqvE8K8kBWK8F");
                assert_eq!(fields["city"], json!("Boston"));
            }
            other => panic!("expected added first, got {other:?}"),
        }
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::DocumentChanged { .. }
        ));
        match events.try_recv().unwrap() {
            Event::DocumentRemoved { collection, id } => {
                assert_eq!(collection, "test-collection");
                assert_eq!(id, "2gAMzqvE8K8kBWK8F");
            }
            other => panic!("expected removed last, got {other:?}"),
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        added: AtomicUsize,
        removed: AtomicUsize,
        last_city: Mutex<Option<String>>,
    }

    impl CollectionObserver for CountingObserver {
        fn on_added(&self, _collection: &str, _id: &str, fields: &Map<String, Value>) {
            self.added.fetch_add(1, Ordering::SeqCst);
            *self.last_city.lock().unwrap() = fields
                .get("city")
                .and_then(Value::as_str)
                .map(str::to_owned);
        }

        fn on_removed(&self, _collection: &str, _id: &str) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn observers_fire_exactly_once_per_mutation() {
        let (client, _events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        let observer = Arc::new(CountingObserver::default());
        client.observe(Some("test-collection"), observer.clone());
        // Filtered to another collection: must not fire.
        let other = Arc::new(CountingObserver::default());
        client.observe(Some("somewhere-else"), other.clone());

        dispatcher.process(frame(
            r#"{"collection":"test-collection","id":"2gAMzqvE8K8kBWK8F","fields":{"state":"MA","city":"Boston"},"msg":"added"}"#,
        ));
        dispatcher.process(frame(
            r#"{"msg":"removed","id":"2gAMzqvE8K8kBWK8F","collection":"test-collection"}"#,
        ));

        assert_eq!(observer.added.load(Ordering::SeqCst), 1);
        assert_eq!(observer.removed.load(Ordering::SeqCst), 1);
        assert_eq!(
            observer.last_city.lock().unwrap().as_deref(),
            Some("Boston")
        );
        assert_eq!(other.added.load(Ordering::SeqCst), 0);
        assert_eq!(other.removed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ready_one_shot_fires_once_and_is_removed() {
        let (client, mut events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        client
            .subscribe_with_id(
                "AllStates",
                "AllStates",
                None,
                Some(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        dispatcher.process(frame(r#"{"msg":"ready","subs":["AllStates"]}"#));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Second identical ready: callback is gone; the tracked path now
        // marks the subscription ready instead.
        dispatcher.process(frame(r#"{"msg":"ready","subs":["AllStates"]}"#));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // One-shot precedence skipped the tracked path the first time, so
        // only the second ready produced a SubscriptionReady event.
        let mut ready_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, Event::SubscriptionReady { .. }) {
                ready_events += 1;
            }
        }
        assert_eq!(ready_events, 1);
    }

    #[test]
    fn result_with_error_resolves_once_then_duplicate_is_noop() {
        let (client, _events, mut out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        let seen: Arc<Mutex<Vec<(Option<Value>, Option<String>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = client
            .method(
                "orders.place",
                None,
                Some(Box::new(move |result, error| {
                    sink.lock()
                        .unwrap()
                        .push((result, error.map(|e| e.to_string())));
                })),
            )
            .unwrap();
        let _method_frame = out.try_recv().unwrap();

        let result_frame = format!(
            r#"{{"msg":"result","id":"{id}","error":{{"error":403,"reason":"Access denied"}}}}"#
        );
        dispatcher.process(frame(&result_frame));
        // Duplicate result for the same id: correlation entry is gone.
        dispatcher.process(frame(&result_frame));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (result, error) = &seen[0];
        assert!(result.is_none());
        assert!(error.as_deref().unwrap().contains("Access denied"));
    }

    #[test]
    fn result_callback_may_reenter_client_api() {
        let (client, _events, mut out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        let reentrant = client.clone();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let id = client
            .method(
                "tasks.touch",
                None,
                Some(Box::new(move |_, _| {
                    // Completions run with no lock held, so calling back
                    // into the client must work.
                    let count = reentrant.subscription_count();
                    let subscribed = reentrant.subscribe("messages", None, None).is_ok();
                    let _ = done_tx.send((count, subscribed));
                })),
            )
            .unwrap();
        let _method_frame = out.try_recv().unwrap();

        let worker = std::thread::spawn(move || {
            dispatcher.process(frame(&format!(
                r#"{{"msg":"result","id":"{id}","result":null}}"#
            )));
        });
        let (count, subscribed) = done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("completion never ran; dispatch lane is stuck");
        assert_eq!(count, 0);
        assert!(subscribed);
        worker.join().unwrap();
        assert_eq!(client.subscription_count(), 1);
    }

    #[test]
    fn result_with_no_waiter_is_dropped_quietly() {
        let (client, mut events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());
        dispatcher.process(frame(r#"{"msg":"result","id":"nobody","result":42}"#));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn nosub_clean_removes_subscription_and_emits_hook() {
        let (client, mut events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        let sub_id = client.subscribe("messages", None, None).unwrap();
        // Unsubscribe does not remove local state; only nosub does.
        client.unsubscribe(&sub_id, None).unwrap();
        assert_eq!(client.subscription_count(), 1);

        dispatcher.process(frame(&format!(r#"{{"msg":"nosub","id":"{sub_id}"}}"#)));
        assert_eq!(client.subscription_count(), 0);

        let removed = std::iter::from_fn(|| events.try_recv().ok())
            .find(|e| matches!(e, Event::SubscriptionRemoved { .. }));
        match removed {
            Some(Event::SubscriptionRemoved { id, name }) => {
                assert_eq!(id, sub_id);
                assert_eq!(name, "messages");
            }
            other => panic!("expected SubscriptionRemoved, got {other:?}"),
        }
    }

    #[test]
    fn nosub_with_error_keeps_subscription_and_surfaces_error() {
        let (client, mut events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        let sub_id = client.subscribe("messages", None, None).unwrap();
        dispatcher.process(frame(&format!(
            r#"{{"msg":"nosub","id":"{sub_id}","error":{{"error":404,"reason":"Subscription not found"}}}}"#
        )));

        assert_eq!(client.subscription_count(), 1);
        match events.try_recv().unwrap() {
            Event::Error { error } => {
                assert_eq!(error.reason.as_deref(), Some("Subscription not found"));
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn nosub_with_empty_error_object_counts_as_clean_removal() {
        let (client, mut events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        let sub_id = client.subscribe("messages", None, None).unwrap();
        dispatcher.process(frame(&format!(
            r#"{{"msg":"nosub","id":"{sub_id}","error":{{}}}}"#
        )));

        assert_eq!(client.subscription_count(), 0);
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::SubscriptionRemoved { .. }
        ));
    }

    #[test]
    fn unsub_callback_takes_precedence_over_removed_hook() {
        let (client, mut events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let sub_id = client.subscribe("messages", None, None).unwrap();
        client
            .unsubscribe(
                &sub_id,
                Some(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        dispatcher.process(frame(&format!(r#"{{"msg":"nosub","id":"{sub_id}"}}"#)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(client.subscription_count(), 0);
        assert!(
            !std::iter::from_fn(|| events.try_recv().ok())
                .any(|e| matches!(e, Event::SubscriptionRemoved { .. }))
        );
    }

    #[test]
    fn updated_forwards_method_ids() {
        let (client, mut events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());
        dispatcher.process(frame(r#"{"msg":"updated","methods":["m1","m2"]}"#));
        match events.try_recv().unwrap() {
            Event::MethodsUpdated { methods } => {
                assert_eq!(methods, vec!["m1".to_string(), "m2".to_string()]);
            }
            other => panic!("expected MethodsUpdated, got {other:?}"),
        }
    }

    #[test]
    fn malformed_frame_routes_through_error_path() {
        let (client, mut events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());
        dispatcher.process(frame(r#"{"msg":"added", "id"oops"}"#));
        match events.try_recv().unwrap() {
            Event::Error { error } => {
                assert!(!error.reason.clone().unwrap_or_default().is_empty());
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn ping_on_dispatch_lane_is_answered_with_matching_id() {
        let (client, _events, mut out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        dispatcher.process(frame(r#"{"msg":"ping","id":"hb-7"}"#));
        let pong: Value = serde_json::from_str(&out.try_recv().unwrap()).unwrap();
        assert_eq!(pong, json!({"msg":"pong","id":"hb-7"}));

        dispatcher.process(frame(r#"{"msg":"ping"}"#));
        let pong: Value = serde_json::from_str(&out.try_recv().unwrap()).unwrap();
        assert_eq!(pong, json!({"msg":"pong"}));
    }

    #[test]
    fn transport_close_emits_disconnect_only_when_connected() {
        let (client, mut events, _out) = test_client();
        let dispatcher = Dispatcher::new(client.inner_for_test());

        // Closed before ever reaching Connected: no Disconnected event.
        dispatcher.process(DispatchItem::TransportClosed {
            code: None,
            reason: "connect refused".into(),
            clean: false,
        });
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::WebsocketClosed { clean: false, .. }
        ));
        assert!(events.try_recv().is_err());

        dispatcher.process(frame(r#"{"msg":"connected","session":"s2"}"#));
        let _ = events.try_recv(); // Connected

        dispatcher.process(DispatchItem::TransportClosed {
            code: Some(1006),
            reason: "abnormal".into(),
            clean: false,
        });
        match events.try_recv().unwrap() {
            Event::WebsocketClosed { code, .. } => assert_eq!(code, Some(1006)),
            other => panic!("expected WebsocketClosed, got {other:?}"),
        }
        assert!(matches!(events.try_recv().unwrap(), Event::Disconnected));
        assert!(!client.is_connected());
    }

    #[test]
    fn local_echo_changes_are_suppressed_when_dedup_enabled() {
        let (client, mut events, _out) = test_client_with(ConnectConfig {
            dedup_local_changes: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(client.inner_for_test());

        client.note_local_change("tasks", "t1", json!({"done": true}));
        dispatcher.process(frame(
            r#"{"msg":"changed","collection":"tasks","id":"t1","fields":{"done":true}}"#,
        ));
        assert!(events.try_recv().is_err());

        // The ledger entry was consumed; an identical later change flows.
        dispatcher.process(frame(
            r#"{"msg":"changed","collection":"tasks","id":"t1","fields":{"done":true}}"#,
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::DocumentChanged { .. }
        ));
    }
}

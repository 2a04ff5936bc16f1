//! DDP client facade.
//!
//! This is the entry point for SDK consumers. [`DdpClient::connect`] spawns
//! the transport supervisor and the dispatch lane, hands back a cheaply
//! cloneable handle plus the event stream, and from then on the handle is
//! the only way collaborators send outbound frames.
//!
//! ## Lanes
//!
//! Inbound frames are processed in strict arrival order on a single
//! dispatch task; heartbeats are answered on the transport lane so they are
//! never starved behind a document backlog; outbound sends from any task or
//! thread are serialized through one send queue. See `connection` and
//! `dispatcher` for the other two lanes.
//!
//! ## Blocking variants
//!
//! The `*_sync` methods block the calling thread until the server resolves
//! the method. They must not run on a thread that drains the client's
//! runtime (the dispatch lane in particular), or the completion they wait
//! for can never fire; the client logs a warning when it detects an async
//! context around such a call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};

use crate::backoff::Backoff;
use crate::connection;
use crate::dispatcher::Dispatcher;
use crate::ejson;
use crate::error::DdpError;
use crate::event::{CollectionObserver, Event};
use crate::ids;
use crate::ledger::ChangeLedger;
use crate::message::Message;
use crate::pending::{CorrelationTable, MethodCallback, ReadyCallback, UnsubCallback};
use crate::session::{Account, FileSessionStore, SessionStore};
use crate::subscription::SubscriptionRegistry;

/// Configuration for connecting to a DDP server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// WebSocket endpoint (`ws://host:port/websocket` or `wss://...`).
    pub url: String,
    /// Framework subscription that is always (re-)issued first after each
    /// handshake, before tracked subscriptions. `None` disables it.
    pub implicit_subscription: Option<String>,
    /// Re-issue a token resume login after every successful handshake while
    /// a non-expired token is stored.
    pub auto_resume: bool,
    /// Reconnection backoff policy.
    pub backoff: Backoff,
    /// Suppress inbound `changed` frames that value-equal a recorded local
    /// change (heuristic local-echo dedup; see the `ledger` module).
    pub dedup_local_changes: bool,
    /// How long a recorded local change stays eligible for dedup.
    pub dedup_ttl: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000/websocket".to_string(),
            implicit_subscription: Some("meteor_autoupdate_clientVersions".to_string()),
            auto_resume: false,
            backoff: Backoff::default(),
            dedup_local_changes: false,
            dedup_ttl: Duration::from_secs(5),
        }
    }
}

/// State owned by the dispatch/transport pair but also written by outbound
/// calls; everything lives under one lock.
pub(crate) struct Shared {
    pub methods: CorrelationTable<MethodCallback>,
    pub sub_ready: CorrelationTable<ReadyCallback>,
    pub unsub_done: CorrelationTable<UnsubCallback>,
    pub subs: SubscriptionRegistry,
    pub ledger: ChangeLedger,
    pub connected: bool,
    pub session_id: Option<String>,
    pub last_pong: Option<Instant>,
}

/// Identity hints captured at login-call time, merged into the persisted
/// record on success. `None` fields keep whatever was stored before.
#[derive(Default)]
pub(crate) struct LoginIdentity {
    pub username: Option<String>,
    pub email: Option<String>,
}

pub(crate) struct ClientInner {
    pub config: ConnectConfig,
    pub shared: Mutex<Shared>,
    pub account: Mutex<Account>,
    pub store: Arc<dyn SessionStore>,
    pub backoff: Mutex<Backoff>,
    pub out_tx: mpsc::UnboundedSender<String>,
    pub event_tx: mpsc::UnboundedSender<Event>,
    pub session_watch: watch::Sender<Option<String>>,
    pub shutdown_tx: watch::Sender<bool>,
    pub observers: Mutex<Vec<(Option<String>, Arc<dyn CollectionObserver>)>>,
    /// Stable id for the implicit framework subscription, generated once so
    /// reconnects re-issue it under the same id.
    pub implicit_sub_id: String,
}

impl ClientInner {
    /// Serialize and enqueue one outbound frame. A frame that fails to
    /// encode is not sent.
    pub(crate) fn send_frame(&self, frame: &Value) -> Result<(), DdpError> {
        let text = Message::serialize(frame).ok_or(DdpError::Encode)?;
        self.out_tx
            .send(text)
            .map_err(|_| DdpError::ConnectionClosed)
    }

    pub(crate) fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn record_pong(&self) {
        self.shared.lock().last_pong = Some(Instant::now());
    }

    pub(crate) fn observers_for(&self, collection: &str) -> Vec<Arc<dyn CollectionObserver>> {
        self.observers
            .lock()
            .iter()
            .filter(|(filter, _)| filter.as_deref().is_none_or(|c| c == collection))
            .map(|(_, obs)| Arc::clone(obs))
            .collect()
    }

    /// Allocate an id, register the optional completion, send the `method`
    /// frame. The registration is rolled back if the send lane is gone.
    pub(crate) fn send_method(
        &self,
        name: &str,
        params: Option<Vec<Value>>,
        callback: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        let id = ids::generate();
        if let Some(cb) = callback {
            self.shared.lock().methods.register(&id, cb);
        }
        let mut frame = json!({"msg": "method", "method": name, "id": id});
        if let Some(params) = params {
            frame["params"] = Value::Array(params);
        }
        if let Err(e) = self.send_frame(&frame) {
            self.shared.lock().methods.resolve(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Issue a login-shaped method call; on success the session record is
    /// persisted before the caller's completion runs. On failure the prior
    /// record is left untouched.
    pub(crate) fn login_method(
        self: &Arc<Self>,
        method_name: &str,
        params: Vec<Value>,
        identity: LoginIdentity,
        callback: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        let inner = Arc::clone(self);
        let wrapped: MethodCallback = Box::new(move |result, error| {
            if error.is_none() {
                inner.store_login_result(result.as_ref(), &identity);
            }
            if let Some(cb) = callback {
                cb(result, error);
            }
        });
        self.send_method(method_name, Some(params), Some(wrapped))
    }

    /// Send a `{resume: token}` login if a non-expired token is stored.
    /// Returns false synchronously, without sending anything, otherwise.
    pub(crate) fn resume_with_stored_token(
        self: &Arc<Self>,
        callback: Option<MethodCallback>,
    ) -> Result<bool, DdpError> {
        let token = {
            let account = self.account.lock();
            if !account.has_valid_token() {
                return Ok(false);
            }
            account.token.clone().unwrap_or_default()
        };
        let params = vec![json!({"resume": token})];
        self.login_method("login", params, LoginIdentity::default(), callback)?;
        Ok(true)
    }

    fn store_login_result(&self, result: Option<&Value>, identity: &LoginIdentity) {
        let Some(result) = result else {
            tracing::warn!("login result carried no payload");
            return;
        };
        let Some(user_id) = result.get("id").and_then(Value::as_str) else {
            tracing::warn!("login result missing user id");
            return;
        };
        let token = result.get("token").and_then(Value::as_str);
        let expiry = result.get("tokenExpires").and_then(ejson::decode_date);
        {
            let mut account = self.account.lock();
            account.user_id = Some(user_id.to_string());
            if let Some(username) = &identity.username {
                account.username = Some(username.clone());
            }
            if let Some(email) = &identity.email {
                account.email = Some(email.clone());
            }
            if let Some(token) = token {
                account.token = Some(token.to_string());
            }
            if expiry.is_some() {
                account.token_expiry = expiry;
            }
            account.save(self.store.as_ref());
        }
        tracing::info!(user_id, "logged in");
        self.emit(Event::LoggedIn {
            user_id: user_id.to_string(),
        });
    }
}

/// A handle to a running DDP client. Cheap to clone; all clones share the
/// same connection and state.
#[derive(Clone)]
pub struct DdpClient {
    inner: Arc<ClientInner>,
}

impl DdpClient {
    /// Connect using the default file-backed session store.
    ///
    /// Spawns the transport supervisor and dispatch lane; must be called
    /// from within a tokio runtime. Returns the handle and the event
    /// stream. The handshake completes asynchronously; wait on
    /// [`DdpClient::await_connected`] or the [`Event::Connected`] event.
    pub fn connect(config: ConnectConfig) -> (DdpClient, mpsc::UnboundedReceiver<Event>) {
        let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::open(
            FileSessionStore::default_path("ddp-client"),
        ));
        Self::connect_with_store(config, store)
    }

    /// Connect with a host-provided session store.
    pub fn connect_with_store(
        config: ConnectConfig,
        store: Arc<dyn SessionStore>,
    ) -> (DdpClient, mpsc::UnboundedReceiver<Event>) {
        let (client, event_rx, out_rx) = Self::build(config, store);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let shutdown_rx = client.inner.shutdown_tx.subscribe();
        tokio::spawn(Dispatcher::new(Arc::clone(&client.inner)).run(dispatch_rx));
        tokio::spawn(connection::run(
            Arc::clone(&client.inner),
            out_rx,
            dispatch_tx,
            shutdown_rx,
        ));
        (client, event_rx)
    }

    fn build(
        config: ConnectConfig,
        store: Arc<dyn SessionStore>,
    ) -> (
        DdpClient,
        mpsc::UnboundedReceiver<Event>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (session_watch, _) = watch::channel(None);
        let (shutdown_tx, _) = watch::channel(false);
        let account = Account::load(store.as_ref());
        let inner = Arc::new(ClientInner {
            shared: Mutex::new(Shared {
                methods: CorrelationTable::new(),
                sub_ready: CorrelationTable::new(),
                unsub_done: CorrelationTable::new(),
                subs: SubscriptionRegistry::new(),
                ledger: ChangeLedger::new(config.dedup_ttl),
                connected: false,
                session_id: None,
                last_pong: None,
            }),
            account: Mutex::new(account),
            store,
            backoff: Mutex::new(config.backoff.clone()),
            out_tx,
            event_tx,
            session_watch,
            shutdown_tx,
            observers: Mutex::new(Vec::new()),
            implicit_sub_id: ids::generate(),
            config,
        });
        (DdpClient { inner }, event_rx, out_rx)
    }

    // ── Connection state ──

    pub fn is_connected(&self) -> bool {
        self.inner.shared.lock().connected
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.shared.lock().session_id.clone()
    }

    /// Timestamp of the most recent inbound `pong` (liveness tracking).
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.inner.shared.lock().last_pong
    }

    /// Wait until a DDP handshake completes and return the session id.
    /// Returns `None` only if the client shut down first.
    pub async fn await_connected(&self) -> Option<String> {
        let mut rx = self.inner.session_watch.subscribe();
        loop {
            if let Some(session) = rx.borrow_and_update().clone() {
                return Some(session);
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Tear down the connection. All pending completions in the three
    /// correlation tables are dropped without being invoked (not failed);
    /// blocked sync callers observe [`DdpError::CompletionDropped`].
    pub fn disconnect(&self) {
        let dropped = {
            let mut shared = self.inner.shared.lock();
            shared.methods.clear() + shared.sub_ready.clear() + shared.unsub_done.clear()
        };
        if dropped > 0 {
            tracing::debug!(dropped, "dropped pending completions on disconnect");
        }
        let _ = self.inner.shutdown_tx.send(true);
    }

    // ── Methods ──

    /// Call a remote method. The optional completion fires exactly once
    /// with `(result-or-none, error-or-none)` when the `result` frame
    /// arrives; returns the request id.
    pub fn method(
        &self,
        name: &str,
        params: Option<Vec<Value>>,
        callback: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        self.inner.send_method(name, params, callback)
    }

    /// Call a remote method and await its result.
    pub async fn call(
        &self,
        name: &str,
        params: Option<Vec<Value>>,
    ) -> Result<Option<Value>, DdpError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.method(
            name,
            params,
            Some(Box::new(move |result, error| {
                let _ = tx.send((result, error));
            })),
        )?;
        match rx.await {
            Ok((_, Some(error))) => Err(DdpError::Remote(error)),
            Ok((result, None)) => Ok(result),
            Err(_) => Err(DdpError::CompletionDropped),
        }
    }

    /// Call a remote method and block the calling thread for the result.
    /// See the module docs for the deadlock caveat.
    pub fn method_sync(
        &self,
        name: &str,
        params: Option<Vec<Value>>,
    ) -> Result<Option<Value>, DdpError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            tracing::warn!(
                method = name,
                "blocking method call inside an async context; this deadlocks if run on the client's runtime thread"
            );
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.method(
            name,
            params,
            Some(Box::new(move |result, error| {
                let _ = tx.send((result, error));
            })),
        )?;
        match rx.recv() {
            Ok((_, Some(error))) => Err(DdpError::Remote(error)),
            Ok((result, None)) => Ok(result),
            Err(_) => Err(DdpError::CompletionDropped),
        }
    }

    // ── Collection helpers ──

    pub fn insert(
        &self,
        collection: &str,
        document: Value,
        callback: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        self.method(&format!("/{collection}/insert"), Some(vec![document]), callback)
    }

    pub fn update(
        &self,
        collection: &str,
        selector: Value,
        modifier: Value,
        callback: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        if self.inner.config.dedup_local_changes
            && let Some(id) = selector.get("_id").and_then(Value::as_str)
            && let Some(set) = modifier.get("$set")
        {
            self.note_local_change(collection, id, set.clone());
        }
        self.method(
            &format!("/{collection}/update"),
            Some(vec![selector, modifier]),
            callback,
        )
    }

    pub fn remove(
        &self,
        collection: &str,
        selector: Value,
        callback: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        self.method(&format!("/{collection}/remove"), Some(vec![selector]), callback)
    }

    pub fn insert_sync(&self, collection: &str, document: Value) -> Result<Option<Value>, DdpError> {
        self.method_sync(&format!("/{collection}/insert"), Some(vec![document]))
    }

    pub fn update_sync(
        &self,
        collection: &str,
        selector: Value,
        modifier: Value,
    ) -> Result<Option<Value>, DdpError> {
        self.method_sync(
            &format!("/{collection}/update"),
            Some(vec![selector, modifier]),
        )
    }

    pub fn remove_sync(&self, collection: &str, selector: Value) -> Result<Option<Value>, DdpError> {
        self.method_sync(&format!("/{collection}/remove"), Some(vec![selector]))
    }

    /// Record a locally-applied field set for local-echo dedup. No-op
    /// unless `dedup_local_changes` is enabled.
    pub fn note_local_change(&self, collection: &str, id: &str, fields: Value) {
        if !self.inner.config.dedup_local_changes {
            return;
        }
        self.inner.shared.lock().ledger.record(collection, id, fields);
    }

    // ── Subscriptions ──

    /// Subscribe to a named record set. The optional one-shot completion
    /// fires when the server's `ready` names this subscription; returns the
    /// subscription id. The `sub` frame goes out immediately while a
    /// session is established, otherwise when the next handshake completes.
    pub fn subscribe(
        &self,
        name: &str,
        params: Option<Vec<Value>>,
        on_ready: Option<ReadyCallback>,
    ) -> Result<String, DdpError> {
        let id = ids::generate();
        self.subscribe_with_id(&id, name, params, on_ready)?;
        Ok(id)
    }

    pub(crate) fn subscribe_with_id(
        &self,
        id: &str,
        name: &str,
        params: Option<Vec<Value>>,
        on_ready: Option<ReadyCallback>,
    ) -> Result<(), DdpError> {
        let send_now = {
            let mut shared = self.inner.shared.lock();
            shared.subs.insert(id, name, params.clone());
            if let Some(cb) = on_ready {
                shared.sub_ready.register(id, cb);
            }
            shared.connected
        };
        // Before the handshake (or during reconnect downtime) the entry is
        // only tracked; the `connected` handler issues it, so each sub id
        // reaches the wire at most once per session.
        if !send_now {
            return Ok(());
        }
        let mut frame = json!({"msg": "sub", "name": name, "id": id});
        if let Some(params) = params {
            frame["params"] = Value::Array(params);
        }
        if let Err(e) = self.inner.send_frame(&frame) {
            let mut shared = self.inner.shared.lock();
            shared.subs.remove(id);
            shared.sub_ready.resolve(id);
            return Err(e);
        }
        Ok(())
    }

    /// Subscribe and await the `ready` for it.
    pub async fn subscribe_and_wait(
        &self,
        name: &str,
        params: Option<Vec<Value>>,
    ) -> Result<String, DdpError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let id = self.subscribe(
            name,
            params,
            Some(Box::new(move || {
                let _ = tx.send(());
            })),
        )?;
        rx.await.map_err(|_| DdpError::CompletionDropped)?;
        Ok(id)
    }

    /// Request removal of a subscription by id. Local tracked state is only
    /// removed when the confirming `nosub` arrives; late document messages
    /// for the subscription are still delivered until then.
    pub fn unsubscribe(&self, id: &str, on_done: Option<UnsubCallback>) -> Result<(), DdpError> {
        if let Some(cb) = on_done {
            self.inner.shared.lock().unsub_done.register(id, cb);
        }
        let frame = json!({"msg": "unsub", "id": id});
        if let Err(e) = self.inner.send_frame(&frame) {
            self.inner.shared.lock().unsub_done.resolve(id);
            return Err(e);
        }
        Ok(())
    }

    /// Unsubscribe the first tracked subscription carrying `name` (names
    /// are not unique; parameterized subscriptions may share one). Returns
    /// the id the `unsub` was sent for, or `None` when nothing matched.
    pub fn unsubscribe_by_name(
        &self,
        name: &str,
        on_done: Option<UnsubCallback>,
    ) -> Result<Option<String>, DdpError> {
        let id = self.inner.shared.lock().subs.first_id_by_name(name);
        match id {
            Some(id) => {
                self.unsubscribe(&id, on_done)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.shared.lock().subs.len()
    }

    /// Register a document observer, optionally filtered to one collection.
    pub fn observe(&self, collection: Option<&str>, observer: Arc<dyn CollectionObserver>) {
        self.inner
            .observers
            .lock()
            .push((collection.map(str::to_owned), observer));
    }

    // ── Accounts ──

    pub fn login_with_email(
        &self,
        email: &str,
        password: &str,
        callback: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        let params = vec![json!({
            "user": {"email": email},
            "password": password_digest(password),
        })];
        let identity = LoginIdentity {
            email: Some(email.to_string()),
            username: None,
        };
        self.inner.login_method("login", params, identity, callback)
    }

    pub fn login_with_username(
        &self,
        username: &str,
        password: &str,
        callback: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        let params = vec![json!({
            "user": {"username": username},
            "password": password_digest(password),
        })];
        let identity = LoginIdentity {
            username: Some(username.to_string()),
            email: None,
        };
        self.inner.login_method("login", params, identity, callback)
    }

    /// Resume the stored session. Returns `Ok(false)` synchronously,
    /// without sending anything, when no non-expired token is stored.
    pub fn login_with_token(&self, callback: Option<MethodCallback>) -> Result<bool, DdpError> {
        self.inner.resume_with_stored_token(callback)
    }

    pub fn signup_with_email(
        &self,
        email: &str,
        password: &str,
        profile: Option<Value>,
        callback: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        let mut user = json!({
            "email": email,
            "password": password_digest(password),
        });
        if let Some(profile) = profile {
            user["profile"] = profile;
        }
        let identity = LoginIdentity {
            email: Some(email.to_string()),
            username: None,
        };
        self.inner
            .login_method("createUser", vec![user], identity, callback)
    }

    /// Log out; the persisted session record is cleared once the server
    /// confirms.
    pub fn logout(&self, callback: Option<MethodCallback>) -> Result<String, DdpError> {
        let inner = Arc::clone(&self.inner);
        let wrapped: MethodCallback = Box::new(move |result, error| {
            if error.is_none() {
                Account::clear(inner.store.as_ref());
                *inner.account.lock() = Account::default();
                inner.emit(Event::LoggedOut);
            }
            if let Some(cb) = callback {
                cb(result, error);
            }
        });
        self.inner.send_method("logout", None, Some(wrapped))
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.account.lock().user_id.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.account.lock().has_valid_token()
    }

    #[cfg(test)]
    pub(crate) fn inner_for_test(&self) -> Arc<ClientInner> {
        Arc::clone(&self.inner)
    }
}

/// Meteor's client-side password hedge: the wire carries a SHA-256 digest,
/// not the cleartext.
fn password_digest(password: &str) -> Value {
    let digest = Sha256::digest(password.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    json!({"digest": hex, "algorithm": "sha-256"})
}

//! Events emitted by the DDP client for collaborators to consume.
//!
//! The event stream is the collaborator-facing contract: UI collections,
//! persistence adapters, and auth flows consume these and never touch the
//! protocol machinery directly. Events are delivered in strict server
//! arrival order for everything that originates from inbound frames.

use serde_json::{Map, Value};

use crate::error::RemoteError;

/// Events the client emits to the consumer (UI, persistence adapter, bot).
#[derive(Debug, Clone)]
pub enum Event {
    /// DDP handshake complete; `session` is the server session id.
    Connected { session: String },

    /// The connection was lost after having been established.
    Disconnected,

    /// The server rejected the protocol version; `suggested_version` is the
    /// version it offered instead.
    Failed { suggested_version: Option<String> },

    /// The underlying WebSocket closed (clean close, error, or EOF).
    WebsocketClosed {
        code: Option<u16>,
        reason: String,
        clean: bool,
    },

    /// A document entered a subscribed set.
    DocumentAdded {
        collection: String,
        id: String,
        fields: Map<String, Value>,
    },

    /// Fields of a subscribed document changed.
    DocumentChanged {
        collection: String,
        id: String,
        fields: Map<String, Value>,
        cleared: Vec<String>,
    },

    /// A document left a subscribed set.
    DocumentRemoved { collection: String, id: String },

    /// Ordered-collection insert; `before` is the id of the successor
    /// document, or `None` for "at the end".
    DocumentAddedBefore {
        collection: String,
        id: String,
        fields: Map<String, Value>,
        before: Option<String>,
    },

    /// Ordered-collection move.
    DocumentMovedBefore {
        collection: String,
        id: String,
        before: Option<String>,
    },

    /// A tracked subscription reached its ready state.
    SubscriptionReady { id: String, name: String },

    /// A tracked subscription was removed by a clean `nosub`.
    SubscriptionRemoved { id: String, name: String },

    /// The server finished writing the effects of these method calls.
    MethodsUpdated { methods: Vec<String> },

    /// A login or resume completed and the session record was persisted.
    LoggedIn { user_id: String },

    /// Logout completed and the session record was cleared.
    LoggedOut,

    /// A protocol-level error: top-level `error` frame, `nosub` error, or a
    /// synthetic decode-failure message.
    Error { error: RemoteError },
}

/// Per-collection document listener, registered with the dispatcher.
///
/// Observers are invoked synchronously on the dispatch lane, so for any one
/// document the `on_added` / `on_changed` / `on_removed` calls arrive in the
/// exact order the server emitted them. Implementations must not block.
///
/// Multiple independent observers may be registered, optionally filtered to
/// a single collection.
pub trait CollectionObserver: Send + Sync {
    fn on_added(&self, collection: &str, id: &str, fields: &Map<String, Value>) {
        let _ = (collection, id, fields);
    }

    fn on_changed(
        &self,
        collection: &str,
        id: &str,
        fields: &Map<String, Value>,
        cleared: &[String],
    ) {
        let _ = (collection, id, fields, cleared);
    }

    fn on_removed(&self, collection: &str, id: &str) {
        let _ = (collection, id);
    }
}

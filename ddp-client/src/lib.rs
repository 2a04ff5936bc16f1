//! ddp-client: an async DDP (Distributed Data Protocol) client SDK.
//!
//! Speaks DDP version "1" over WebSocket: method calls with correlated
//! results, live subscriptions with ordered document updates, and
//! password/token account flows. The client reconnects on its own with
//! exponential backoff and re-issues tracked subscriptions after each
//! handshake; consumers watch the [`Event`] stream and never touch the
//! wire.
//!
//! Entry point is [`DdpClient::connect`]; see the `client` module docs for
//! the concurrency model.

pub mod backoff;
pub mod client;
mod connection;
mod dispatcher;
pub mod ejson;
pub mod error;
pub mod event;
pub mod ids;
mod ledger;
pub mod message;
mod pending;
pub mod session;
mod subscription;

pub use backoff::Backoff;
pub use client::{ConnectConfig, DdpClient};
pub use ejson::ApplyFields;
pub use error::{DdpError, RemoteError};
pub use event::{CollectionObserver, Event};
pub use pending::{MethodCallback, ReadyCallback, UnsubCallback};
pub use session::{Account, FileSessionStore, MemorySessionStore, SessionStore};
pub use subscription::Subscription;

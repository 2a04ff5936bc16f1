//! Persisted account/session state.
//!
//! The login record (user id, identity, resume token, token expiry) is kept
//! in whatever key-value store the host provides through [`SessionStore`].
//! Keys are fixed strings; values are opaque scalars. The default store is a
//! small JSON file under the user config directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

pub const KEY_USER_ID: &str = "ddp.userId";
pub const KEY_USERNAME: &str = "ddp.username";
pub const KEY_EMAIL: &str = "ddp.email";
pub const KEY_TOKEN: &str = "ddp.authToken";
/// Millis since epoch, as a decimal string.
pub const KEY_TOKEN_EXPIRY: &str = "ddp.tokenExpiry";
pub const KEY_LOGGED_IN: &str = "ddp.loggedIn";

/// Host-provided key-value persistence for the session record.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-memory store; useful for tests and hosts that opt out of persistence.
#[derive(Default)]
pub struct MemorySessionStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.map.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.map.lock().remove(key);
    }
}

/// JSON-file-backed store, write-through on every mutation.
pub struct FileSessionStore {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
}

impl FileSessionStore {
    /// Open (or create) the store at `path`. A missing or unreadable file
    /// starts empty; corruption is logged, never fatal.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "bad session file, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            map: Mutex::new(map),
        }
    }

    /// Default location: `<config dir>/<app>/session.json`.
    pub fn default_path(app: &str) -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(app)
            .join("session.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, map: &BTreeMap<String, String>) {
        if let Some(dir) = self.path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match serde_json::to_string_pretty(map) {
            Ok(text) => {
                if let Err(e) = std::fs::write(&self.path, text) {
                    tracing::warn!(path = %self.path.display(), error = %e, "can't write session file");
                }
            }
            Err(e) => tracing::warn!(error = %e, "can't encode session file"),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut map = self.map.lock();
        map.insert(key.to_string(), value.to_string());
        self.persist(&map);
    }

    fn remove(&self, key: &str) {
        let mut map = self.map.lock();
        if map.remove(key).is_some() {
            self.persist(&map);
        }
    }
}

/// The in-memory view of the persisted login record.
#[derive(Debug, Clone, Default)]
pub struct Account {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
}

impl Account {
    pub fn load(store: &dyn SessionStore) -> Account {
        let token_expiry = store
            .get(KEY_TOKEN_EXPIRY)
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        Account {
            user_id: store.get(KEY_USER_ID),
            username: store.get(KEY_USERNAME),
            email: store.get(KEY_EMAIL),
            token: store.get(KEY_TOKEN),
            token_expiry,
        }
    }

    pub fn save(&self, store: &dyn SessionStore) {
        match &self.user_id {
            Some(id) => store.set(KEY_USER_ID, id),
            None => store.remove(KEY_USER_ID),
        }
        match &self.username {
            Some(name) => store.set(KEY_USERNAME, name),
            None => store.remove(KEY_USERNAME),
        }
        match &self.email {
            Some(email) => store.set(KEY_EMAIL, email),
            None => store.remove(KEY_EMAIL),
        }
        match &self.token {
            Some(token) => store.set(KEY_TOKEN, token),
            None => store.remove(KEY_TOKEN),
        }
        match self.token_expiry {
            Some(when) => store.set(KEY_TOKEN_EXPIRY, &when.timestamp_millis().to_string()),
            None => store.remove(KEY_TOKEN_EXPIRY),
        }
        store.set(KEY_LOGGED_IN, if self.token.is_some() { "true" } else { "false" });
    }

    pub fn clear(store: &dyn SessionStore) {
        for key in [
            KEY_USER_ID,
            KEY_USERNAME,
            KEY_EMAIL,
            KEY_TOKEN,
            KEY_TOKEN_EXPIRY,
        ] {
            store.remove(key);
        }
        store.set(KEY_LOGGED_IN, "false");
    }

    /// A resume login is permitted only while the stored expiry is strictly
    /// in the future.
    pub fn has_valid_token(&self) -> bool {
        match (&self.token, self.token_expiry) {
            (Some(_), Some(expiry)) => expiry > Utc::now(),
            _ => false,
        }
    }
}

//! DDP wire-message codec.
//!
//! One JSON object per text frame. [`Message::parse`] never fails: unknown
//! `msg` values classify as [`MessageKind::Unhandled`], and undecodable text
//! becomes a synthetic `error`-kind message carrying a diagnostic reason plus
//! the offending text, so malformed input flows through the normal error
//! path instead of tearing anything down.

use serde_json::{Map, Value};

/// Reason string carried by synthetic error messages built from
/// undecodable frames.
pub const DECODE_FAILURE_REASON: &str = "malformed JSON frame";

/// Closed classification of inbound DDP messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Connected,
    Failed,
    Ping,
    Pong,
    Nosub,
    Added,
    Changed,
    Removed,
    Ready,
    AddedBefore,
    MovedBefore,
    Result,
    Updated,
    Error,
    /// Anything with an unrecognized (or missing) `msg` value.
    Unhandled,
}

impl MessageKind {
    fn classify(msg: &str) -> MessageKind {
        match msg {
            "connected" => MessageKind::Connected,
            "failed" => MessageKind::Failed,
            "ping" => MessageKind::Ping,
            "pong" => MessageKind::Pong,
            "nosub" => MessageKind::Nosub,
            "added" => MessageKind::Added,
            "changed" => MessageKind::Changed,
            "removed" => MessageKind::Removed,
            "ready" => MessageKind::Ready,
            "addedBefore" => MessageKind::AddedBefore,
            "movedBefore" => MessageKind::MovedBefore,
            "result" => MessageKind::Result,
            "updated" => MessageKind::Updated,
            "error" => MessageKind::Error,
            _ => MessageKind::Unhandled,
        }
    }
}

/// An immutable decoded view over one inbound frame.
///
/// Constructed once per frame, consumed by the dispatcher, discarded.
/// All accessors are optional reads; a missing key is not an error.
#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    value: Value,
}

impl Message {
    /// Decode one text frame. Never fails; see module docs.
    pub fn parse(text: &str) -> Message {
        match serde_json::from_str::<Value>(text) {
            Ok(value) if value.is_object() => {
                let kind = value
                    .get("msg")
                    .and_then(Value::as_str)
                    .map(MessageKind::classify)
                    .unwrap_or(MessageKind::Unhandled);
                Message { kind, value }
            }
            Ok(_) => Self::decode_failure(text),
            Err(_) => Self::decode_failure(text),
        }
    }

    fn decode_failure(text: &str) -> Message {
        Message {
            kind: MessageKind::Error,
            value: serde_json::json!({
                "msg": "error",
                "reason": DECODE_FAILURE_REASON,
                "offendingMessage": text,
            }),
        }
    }

    /// Wrap an already-decoded JSON object (used by round-trip paths).
    pub fn from_value(value: Value) -> Message {
        let kind = value
            .get("msg")
            .and_then(Value::as_str)
            .map(MessageKind::classify)
            .unwrap_or(MessageKind::Unhandled);
        Message { kind, value }
    }

    /// Encode an outbound frame. `None` means "do not send".
    pub fn serialize(value: &Value) -> Option<String> {
        serde_json::to_string(value).ok()
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The raw underlying JSON object.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether the underlying object carries `key`.
    pub fn has(&self, key: &str) -> bool {
        self.value.get(key).is_some()
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    fn string_list(&self, key: &str) -> Vec<String> {
        self.value
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The raw `msg` discriminant string.
    pub fn msg(&self) -> Option<&str> {
        self.str_field("msg")
    }

    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    pub fn session(&self) -> Option<&str> {
        self.str_field("session")
    }

    pub fn collection(&self) -> Option<&str> {
        self.str_field("collection")
    }

    /// `version` from a `failed` reply (the version the server suggests).
    pub fn version(&self) -> Option<&str> {
        self.str_field("version")
    }

    pub fn reason(&self) -> Option<&str> {
        self.str_field("reason")
    }

    /// `before` from `addedBefore` / `movedBefore` (None means "at the end").
    pub fn before(&self) -> Option<&str> {
        self.str_field("before")
    }

    /// `fields` from document mutations; passed through uninterpreted.
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.value.get("fields").and_then(Value::as_object)
    }

    /// `cleared` from a `changed` message.
    pub fn cleared(&self) -> Vec<String> {
        self.string_list("cleared")
    }

    /// `subs` from a `ready` message.
    pub fn subs(&self) -> Vec<String> {
        self.string_list("subs")
    }

    /// `methods` from an `updated` message.
    pub fn methods(&self) -> Vec<String> {
        self.string_list("methods")
    }

    /// `result` from a `result` message.
    pub fn result(&self) -> Option<&Value> {
        self.value.get("result")
    }

    /// `error` object from `result` / `nosub` / top-level `error`.
    pub fn error(&self) -> Option<&Value> {
        self.value.get("error")
    }
}

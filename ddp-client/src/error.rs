//! Error taxonomy for the DDP client.
//!
//! Transport and decode failures are recovered internally (reconnect loop,
//! synthetic error frames) and surfaced as [`crate::event::Event`]
//! notifications; the errors here are what API calls hand back to the
//! specific caller. Nothing in this crate is fatal to the process.

use std::fmt;

use serde_json::Value;

/// Errors returned by client API calls.
#[derive(Debug, thiserror::Error)]
pub enum DdpError {
    /// The outbound send lane is gone (client was shut down).
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be serialized; the frame was not sent.
    #[error("frame could not be serialized")]
    Encode,

    /// The server answered the request with a DDP error object.
    #[error("server error: {0}")]
    Remote(RemoteError),

    /// A synchronous wrapper's completion signal was dropped before firing.
    #[error("completion signal dropped before a result arrived")]
    CompletionDropped,
}

/// A structured DDP error object, as found in `error` frames and in the
/// `error` field of `result` / `nosub` frames.
///
/// Every field is optional; servers differ in what they populate.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RemoteError {
    /// Error code (a number or string, server-defined).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Short machine-oriented reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error class (Meteor sends "Meteor.Error" for application errors).
    #[serde(rename = "errorType", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Extra server-defined detail payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// The inbound frame that triggered a top-level `error` message.
    #[serde(rename = "offendingMessage", skip_serializing_if = "Option::is_none")]
    pub offending_message: Option<Value>,
}

impl RemoteError {
    /// Build from a raw JSON error object. Unknown shapes degrade to an
    /// error whose `details` carries the original value.
    pub fn from_value(value: &Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(err) => err,
            Err(_) => RemoteError {
                details: Some(value.clone()),
                ..Default::default()
            },
        }
    }

    /// True when no field is populated (`nosub` with `error: {}`).
    pub fn is_empty(&self) -> bool {
        self.error.is_none()
            && self.reason.is_none()
            && self.message.is_none()
            && self.error_type.is_none()
            && self.details.is_none()
            && self.offending_message.is_none()
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.reason {
            write!(f, "{reason}")?;
        } else if let Some(message) = &self.message {
            write!(f, "{message}")?;
        } else {
            write!(f, "unspecified server error")?;
        }
        if let Some(code) = &self.error {
            write!(f, " (error: {code})")?;
        }
        Ok(())
    }
}

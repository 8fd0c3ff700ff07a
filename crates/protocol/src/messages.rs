//! Message envelope for the tether wire protocol.
//!
//! Three shapes travel on the wire, all JSON-serializable and
//! transport-agnostic:
//!
//! - [`Request`]: `{id, guid, method, params, metadata}`, an outbound call
//! - [`Response`]: `{id, result?, error?}`, correlated by `id`
//! - [`Event`]: `{guid, method, params}`, no `id`; either a lifecycle
//!   method (`__create__`, `__adopt__`, `__dispose__`) or a declared
//!   domain event name
//!
//! [`Message`] is the inbound discriminated union. Only JSON objects are
//! classified, by presence of `id`; any other shape is carried through as
//! [`Message::Unknown`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle method name for object creation.
pub const CREATE_METHOD: &str = "__create__";
/// Lifecycle method name for reparenting.
pub const ADOPT_METHOD: &str = "__adopt__";
/// Lifecycle method name for disposal.
pub const DISPOSE_METHOD: &str = "__dispose__";

/// Metadata attached to every outbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Unix timestamp in milliseconds.
    #[serde(rename = "wallTime")]
    pub wall_time: i64,
    /// Whether this is an internal call (not user-facing API).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal: Option<bool>,
    /// Source location where the API was called.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// Source code location for a protocol call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Metadata {
    /// Minimal metadata with the current timestamp.
    pub fn now() -> Self {
        Self {
            wall_time: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
            internal: Some(false),
            location: None,
        }
    }
}

/// Outbound call envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Strictly increasing request id used to correlate the response.
    pub id: u32,
    /// GUID of the target object.
    #[serde(
        serialize_with = "serialize_arc_str",
        deserialize_with = "deserialize_arc_str"
    )]
    pub guid: Arc<str>,
    /// Method name to invoke.
    pub method: String,
    /// Method parameters as a JSON object.
    pub params: Value,
    /// Timing and call-site metadata.
    pub metadata: Metadata,
}

/// Serde helper for `Arc<str>` fields.
pub fn serialize_arc_str<S>(arc: &Arc<str>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(arc)
}

/// Serde helper for `Arc<str>` fields.
pub fn deserialize_arc_str<'de, D>(deserializer: D) -> std::result::Result<Arc<str>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    Ok(Arc::from(s.as_str()))
}

/// Reply to a [`Request`], correlated by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u32,
    /// Success result (mutually exclusive with `error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload (mutually exclusive with `result`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorWrapper>,
}

/// Wrapper object around the remote error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
    pub error: ErrorPayload,
}

/// Error details as reported by the far side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    /// Error type name (e.g. "TimeoutError").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Remote stack trace, if available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Server-pushed event: lifecycle or domain, distinguished by `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(
        serialize_with = "serialize_arc_str",
        deserialize_with = "deserialize_arc_str"
    )]
    pub guid: Arc<str>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Discriminated union of inbound messages.
///
/// An object with an `id` is a response; an object with `guid` and `method`
/// is an event. Everything else, arrays and scalars included, is kept intact
/// as `Unknown`, which keeps the client forward-compatible with envelope
/// shapes introduced by newer servers.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    Response(Response),
    Event(Event),
    Unknown(Value),
}

impl Message {
    /// Classifies a decoded JSON value into the matching arm.
    ///
    /// Classification looks at the envelope shape first, so a positional
    /// match can never claim a payload that is not an object. An object
    /// whose declared fields fail to decode also falls back to `Unknown`.
    pub fn from_value(value: Value) -> Self {
        if let Value::Object(map) = &value {
            if map.contains_key("id") {
                if let Ok(response) = Response::deserialize(&value) {
                    return Message::Response(response);
                }
            } else if map.contains_key("guid") && map.contains_key("method") {
                if let Ok(event) = Event::deserialize(&value) {
                    return Message::Event(event);
                }
            }
        }
        Message::Unknown(value)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Message::from_value(Value::deserialize(deserializer)?))
    }
}

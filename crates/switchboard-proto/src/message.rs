//! The message envelope.

use crate::label;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Unique message identifier, assigned by the creator of the envelope.
pub type MessageId = Uuid;

/// A scalar value stored in a message's property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// String value.
    Str(String),
    /// Signed integer value.
    I64(i64),
    /// Floating-point value.
    F64(f64),
    /// Boolean value.
    Bool(bool),
}

impl PropertyValue {
    /// The value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::I64(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Str(v) => f.write_str(v),
            PropertyValue::I64(v) => write!(f, "{v}"),
            PropertyValue::F64(v) => write!(f, "{v}"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::I64(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::F64(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

/// Default time-to-live for a freshly created message.
pub const DEFAULT_TIME_TO_LIVE: Duration = Duration::from_secs(60);

/// The unit of communication: a mutable envelope carrying addressing,
/// correlation, and property data around an opaque byte body.
///
/// Invariant: a message used as a reply sets [`Message::response_to`] to
/// the identifier of the message it answers; a fresh request leaves it
/// `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, assigned at creation. The correlation key for
    /// replies to this message.
    pub id: MessageId,
    /// Routing/intent tag. Compared with [`label::matches`].
    pub label: String,
    /// Destination client identity for session-affine channels.
    pub target_session: Option<String>,
    /// Free-form destination hint (alias or entity name).
    pub to: Option<String>,
    /// Entity (channel name) replies should be sent on.
    pub reply_to_entity: Option<String>,
    /// Session replies should be addressed to.
    pub reply_to_session: Option<String>,
    /// Identifier of the message this one answers.
    pub response_to: Option<MessageId>,
    /// How long the message stays deliverable.
    pub time_to_live: Duration,
    /// Set by the transport when the message is enqueued. Read-only for
    /// everyone else.
    pub enqueued_time: Option<DateTime<Utc>>,
    /// Content-type hint for the body.
    pub body_type: String,
    /// Opaque payload.
    pub body: Bytes,
    /// String-keyed scalar property bag.
    pub properties: HashMap<String, PropertyValue>,
}

impl Message {
    /// Create a fresh message with the given label.
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            target_session: None,
            to: None,
            reply_to_entity: None,
            reply_to_session: None,
            response_to: None,
            time_to_live: DEFAULT_TIME_TO_LIVE,
            enqueued_time: None,
            body_type: String::new(),
            body: Bytes::new(),
            properties: HashMap::new(),
        }
    }

    /// Create a reply to `request`: fresh identifier, `response_to` set to
    /// the request's identifier, and `target_session` addressed back to the
    /// request's reply-to session.
    pub fn reply_to(request: &Message, label: impl Into<String>) -> Self {
        let mut reply = Self::with_label(label);
        reply.response_to = Some(request.id);
        reply.target_session = request.reply_to_session.clone();
        reply
    }

    /// Builder-style property insertion.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builder-style body assignment.
    pub fn body(mut self, body_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.body_type = body_type.into();
        self.body = body.into();
        self
    }

    /// Insert or overwrite a property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Fetch a string property.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(PropertyValue::as_str)
    }

    /// Whether this message's label matches `other` under the label rule.
    pub fn has_label(&self, other: &str) -> bool {
        label::matches(&self.label, other)
    }

    /// Whether this message answers `id`.
    pub fn answers(&self, id: MessageId) -> bool {
        self.response_to == Some(id)
    }
}

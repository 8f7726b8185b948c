//! 📦 Common data structures — the building blocks of hfx.
//!
//! 🎬 INT. HONEYPOT — 3:12 AM. A bot in a faraway datacenter tries `root:root`
//! for the nine-thousandth time. The sensor writes it down. The broker shouts it
//! across the internet. And then one of these structs catches it.
//!
//! Three shapes live here:
//! - [`RawMessage`] — bytes fresh off the feed, plus the channel they came from.
//! - [`Record`] — the decoded field mapping. Flat. String keys, scalar values.
//! - [`IndexedDocument`] — a record that knows which index it is headed to.
//!
//! 🦆

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;

/// 🏷️ The field that decides which index a record lands in.
pub const APP_FIELD: &str = "app";

/// 📡 One message as delivered by the feed. Opaque bytes; nobody has looked inside yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub channel: String,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// 🔍 Lossy UTF-8 view of the payload, for the logs you will squint at later.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// 🎭 A single field value. Honeypots speak in strings, numbers and booleans,
/// and that is all we listen for.
///
/// Serialized untagged, so a [`Record`] flattens straight into the JSON object the
/// store expects. `Number` keeps the original JSON number so integers stay integers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl FieldValue {
    /// 🔢 Numeric view. Only `Number` qualifies; a latitude written as a string is not a latitude.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<serde_json::Number> for FieldValue {
    fn from(value: serde_json::Number) -> Self {
        FieldValue::Number(value)
    }
}

/// 📋 A decoded sensor record: field name → scalar value.
///
/// `BTreeMap` keeps the serialized field order stable, which makes bulk bodies
/// diffable and tests boring (the good kind of boring).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// ✏️ Insert or overwrite a field. Returns the previous value, if there was one.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.fields.insert(field.into(), value.into())
    }

    /// 🏷️ The application identifier. Missing or non-string `app` reads as `""`.
    pub fn app(&self) -> &str {
        self.get(APP_FIELD).and_then(FieldValue::as_str).unwrap_or_default()
    }

    /// 🔢 A numeric field, or `None` if it is absent or not a number.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_f64)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// 📬 A record with a destination. One entry of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub index: String,
    pub record: Record,
}

//! 🔍 Decode — bytes in, [`Record`] out, or a polite refusal.
//!
//! The feed promises JSON objects. The feed also promised it would never go down.
//! Anything that is not a JSON object is a [`DecodeError`]; the caller logs it and
//! moves on. Nothing here is retried, and nothing here panics.

use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::common::{FieldValue, RawMessage, Record};

/// 💀 Why a payload did not make it past the front door.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// 📦 Parse one raw message into a flat record.
///
/// `null` fields are skipped, the same way an absent field would be. So are arrays
/// and nested objects: the rest of the event is still worth indexing.
pub fn decode(raw: &RawMessage) -> Result<Record, DecodeError> {
    let value: Value = serde_json::from_slice(&raw.payload)?;
    let object = match value {
        Value::Object(object) => object,
        other => return Err(DecodeError::NotAnObject(json_kind(&other))),
    };

    let mut fields = Vec::with_capacity(object.len());
    for (field, value) in object {
        let value = match value {
            Value::String(s) => FieldValue::Text(s),
            Value::Number(n) => FieldValue::Number(n),
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Null => continue,
            Value::Array(_) | Value::Object(_) => {
                trace!(field = %field, channel = %raw.channel, "🪆 skipping nested field");
                continue;
            }
        };
        fields.push((field, value));
    }

    Ok(fields.into_iter().collect())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

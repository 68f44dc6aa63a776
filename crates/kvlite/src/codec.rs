//! Value codec.
//!
//! Two paths into a table:
//!
//! - raw bytes, stored verbatim with no framing;
//! - anything `Serialize`, stored as a self-describing JSON envelope
//!   `{"shape": "...", "value": ...}`.
//!
//! The shape tag records what kind of value was written so a read into the
//! wrong destination type reports what was actually stored.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stored bytes are not a structured value: {0}")]
    Malformed(String),

    #[error("Stored {shape} value cannot be read as {target}: {reason}")]
    Mismatch {
        shape: Shape,
        target: &'static str,
        reason: String,
    },
}

/// Kind of structured value held in an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Null,
    Bool,
    Integer,
    Float,
    Text,
    Sequence,
    Record,
}

impl Shape {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Bool,
            Value::Number(n) if n.is_f64() => Shape::Float,
            Value::Number(_) => Shape::Integer,
            Value::String(_) => Shape::Text,
            Value::Array(_) => Shape::Sequence,
            Value::Object(_) => Shape::Record,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Null => "null",
            Shape::Bool => "bool",
            Shape::Integer => "integer",
            Shape::Float => "float",
            Shape::Text => "text",
            Shape::Sequence => "sequence",
            Shape::Record => "record",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    shape: Shape,
    value: &'a Value,
}

#[derive(Deserialize)]
struct Envelope {
    shape: Shape,
    value: Value,
}

/// Encode `value` into `buf`, replacing whatever `buf` held.
pub fn encode<V: Serialize + ?Sized>(value: &V, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    buf.clear();
    let value = serde_json::to_value(value)?;
    let envelope = EnvelopeRef {
        shape: Shape::of(&value),
        value: &value,
    };
    serde_json::to_writer(&mut *buf, &envelope)?;
    Ok(())
}

/// Copy raw bytes into `buf` unchanged, replacing whatever `buf` held.
pub fn encode_raw(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.clear();
    buf.extend_from_slice(bytes);
}

/// Rebuild a `T` from an envelope written by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    serde_json::from_value(envelope.value).map_err(|e| CodecError::Mismatch {
        shape: envelope.shape,
        target: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

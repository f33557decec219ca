//! Common types shared by the relay crates

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

use crate::error::EncodeError;

// ============================================================================
// Transport Types
// ============================================================================

/// A message as delivered by the transport: the topic it arrived on and its
/// undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

// ============================================================================
// Document Types
// ============================================================================

/// Separator between parent and child keys in a flattened attribute path
pub const PATH_SEPARATOR: char = '.';

/// A decoded telemetry document, keyed in sorted order.
pub type Document = BTreeMap<String, Value>;

/// Every value kind a document may hold.
///
/// JSON booleans, nulls and arrays have no representation here; they are
/// rejected when lifting a JSON object with [`document_from_json`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(Number),
    Binary(Vec<u8>),
    Nested(Document),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value.into())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Binary(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Nested(value)
    }
}

/// Lift a JSON object into a [`Document`].
///
/// Fails on the first leaf (in key order) that is a boolean, null or array,
/// reporting its dotted path.
pub fn document_from_json(object: &Map<String, JsonValue>) -> Result<Document, EncodeError> {
    lift_object(object, None)
}

fn lift_object(
    object: &Map<String, JsonValue>,
    prefix: Option<&str>,
) -> Result<Document, EncodeError> {
    let mut document = Document::new();
    for (key, value) in object {
        let path = match prefix {
            Some(parent) => format!("{parent}{PATH_SEPARATOR}{key}"),
            None => key.clone(),
        };
        let lifted = match value {
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Number(n) => Value::Number(n.clone()),
            JsonValue::Object(child) => Value::Nested(lift_object(child, Some(&path))?),
            JsonValue::Bool(_) => return Err(unsupported(path, "boolean")),
            JsonValue::Null => return Err(unsupported(path, "null")),
            JsonValue::Array(_) => return Err(unsupported(path, "array")),
        };
        document.insert(key.clone(), lifted);
    }
    Ok(document)
}

fn unsupported(path: String, kind: &'static str) -> EncodeError {
    EncodeError::UnsupportedValueKind { path, kind }
}

// ============================================================================
// Attribute Types
// ============================================================================

/// A flat item ready for the store, keyed by dotted attribute path.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// A store attribute tagged with its type marker.
///
/// Numbers are carried as their canonical decimal text, which is how the
/// store accepts numeric attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    String(String),
    #[serde(rename = "N")]
    Number(String),
    #[serde(rename = "B")]
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// The store's one-letter type marker
    pub fn tag(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "S",
            AttributeValue::Number(_) => "N",
            AttributeValue::Binary(_) => "B",
        }
    }
}

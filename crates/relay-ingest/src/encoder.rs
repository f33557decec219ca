//! Attribute encoding
//!
//! Turns a decoded document into the flat, type-tagged item the store takes.
//! Nested documents are flattened to any depth by joining keys with `.`, so
//! `{"location": {"latitude": 37.77}}` becomes `location.latitude -> N "37.77"`.

use relay_common::types::document_from_json;
use relay_common::{AttributeMap, AttributeValue, Document, EncodeError, Value};
use serde_json::{Map, Number, Value as JsonValue};
use tracing::warn;

pub use relay_common::types::PATH_SEPARATOR;

/// Encode a JSON-decoded object into an attribute map.
///
/// Fails as a whole if any leaf is a boolean, null or array; nothing is
/// partially encoded.
pub fn encode(object: &Map<String, JsonValue>) -> Result<AttributeMap, EncodeError> {
    let document = document_from_json(object)?;
    Ok(flatten(&document))
}

/// Flatten a document into an attribute map.
///
/// Keys are visited in sorted order. If two paths collapse onto the same
/// flattened key (a literal `"a.b"` next to `{"a": {"b": ..}}`), the later
/// one in that order overwrites the earlier and a warning is logged.
pub fn flatten(document: &Document) -> AttributeMap {
    let mut item = AttributeMap::new();
    for (key, value) in document {
        match value {
            Value::Nested(child) => {
                for (child_key, child_value) in flatten(child) {
                    insert(&mut item, format!("{key}{PATH_SEPARATOR}{child_key}"), child_value);
                }
            },
            Value::String(s) => insert(&mut item, key.clone(), AttributeValue::String(s.clone())),
            Value::Number(n) => insert(&mut item, key.clone(), AttributeValue::Number(number_text(n))),
            Value::Binary(b) => insert(&mut item, key.clone(), AttributeValue::Binary(b.clone())),
        }
    }
    item
}

/// Decimal text for a number attribute.
///
/// Integer literals keep every digit, however wide. Anything with a fraction
/// or exponent is rewritten as the shortest text that reads back to the same
/// `f64`: 34.5 -> "34.5", 35.0 -> "35.0".
fn number_text(n: &Number) -> String {
    let text = n.to_string();
    if !text.contains(['.', 'e', 'E']) {
        return text;
    }
    n.as_f64()
        .and_then(Number::from_f64)
        .map(|shortest| shortest.to_string())
        .unwrap_or(text)
}

fn insert(item: &mut AttributeMap, key: String, value: AttributeValue) {
    if item.contains_key(&key) {
        warn!(key = %key, "flattened attribute path collides with an earlier key, overwriting");
    }
    item.insert(key, value);
}

//! Minimum-shape checks applied before a message is encoded

use serde_json::{Map, Value as JsonValue};

pub const CLIENT_ID_KEY: &str = "client_id";
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Reason a decoded message was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing client_id")]
    MissingClientId,

    #[error("missing or non-numeric timestamp")]
    BadTimestamp,
}

/// Check the fields every telemetry message must carry.
///
/// `client_id` must be present (any value). `timestamp` must be present and
/// read as a float, either as a JSON number or as numeric text. Checks stop at
/// the first failure; all other fields pass through untouched.
pub fn validate(document: &Map<String, JsonValue>) -> Result<(), ValidationError> {
    if !document.contains_key(CLIENT_ID_KEY) {
        return Err(ValidationError::MissingClientId);
    }

    match document.get(TIMESTAMP_KEY).and_then(timestamp_as_f64) {
        Some(_) => Ok(()),
        None => Err(ValidationError::BadTimestamp),
    }
}

fn timestamp_as_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_accepts_numeric_timestamp() {
        let doc = object(json!({ "client_id": "abc", "timestamp": 1700000000.25 }));
        assert_eq!(validate(&doc), Ok(()));
    }

    #[test]
    fn test_accepts_numeric_text_timestamp() {
        let doc = object(json!({ "client_id": "abc", "timestamp": " 1700000000 " }));
        assert_eq!(validate(&doc), Ok(()));
    }

    #[test]
    fn test_rejects_missing_client_id() {
        let doc = object(json!({ "timestamp": 1 }));
        assert_eq!(validate(&doc), Err(ValidationError::MissingClientId));
    }

    #[test]
    fn test_client_id_checked_first() {
        let doc = object(json!({ "location": { "latitude": 1.0 } }));
        assert_eq!(validate(&doc), Err(ValidationError::MissingClientId));
    }

    #[test]
    fn test_rejects_missing_timestamp() {
        let doc = object(json!({ "client_id": "abc" }));
        assert_eq!(validate(&doc), Err(ValidationError::BadTimestamp));
    }

    #[test]
    fn test_rejects_non_numeric_timestamp() {
        for bad in [json!("yesterday"), json!(true), json!(null), json!({ "s": 1 })] {
            let doc = object(json!({ "client_id": "abc", "timestamp": bad }));
            assert_eq!(validate(&doc), Err(ValidationError::BadTimestamp));
        }
    }

    #[test]
    fn test_reasons_read_as_messages() {
        assert_eq!(ValidationError::MissingClientId.to_string(), "missing client_id");
        assert_eq!(
            ValidationError::BadTimestamp.to_string(),
            "missing or non-numeric timestamp"
        );
    }
}

//! Request normalization - force streaming mode on an arbitrary JSON envelope
//!
//! The relay never validates the caller's request beyond "is it a JSON object".
//! The envelope is kept as a `serde_json::Map`, which (with `preserve_order`)
//! is an insertion-ordered map, so re-encoding does not reorder keys. With
//! `arbitrary_precision` numbers keep their original textual form.

use serde_json::{Map, Value};

use super::error::ProxyError;

/// The field that switches the upstream into incremental streaming mode
pub const STREAM_FIELD: &str = "stream";

/// Parse an inbound body into a request envelope
///
/// Anything other than a top-level JSON object is a `MalformedRequest`.
pub(crate) fn parse_envelope(body: &[u8]) -> Result<Map<String, Value>, ProxyError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProxyError::MalformedRequest(format!(
            "expected a JSON object, got {}",
            kind_of(&other)
        ))),
        Err(e) => Err(ProxyError::MalformedRequest(e.to_string())),
    }
}

/// Produce a new envelope with `stream: true`
///
/// An existing `stream` key keeps its position (whatever its previous type);
/// a missing one is appended after every other field.
pub(crate) fn with_streaming(mut envelope: Map<String, Value>) -> Map<String, Value> {
    envelope.insert(STREAM_FIELD.to_string(), Value::Bool(true));
    envelope
}

/// Normalize a raw inbound body into the bytes sent upstream
pub(crate) fn force_streaming(body: &[u8]) -> Result<Vec<u8>, ProxyError> {
    let envelope = with_streaming(parse_envelope(body)?);
    serde_json::to_vec(&envelope).map_err(|e| ProxyError::MalformedRequest(e.to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(input: &str) -> String {
        String::from_utf8(force_streaming(input.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn test_missing_field_is_appended_last() {
        let out = normalize(r#"{"model":"llama3","prompt":"hi","options":{"temperature":0.7}}"#);
        assert_eq!(
            out,
            r#"{"model":"llama3","prompt":"hi","options":{"temperature":0.7},"stream":true}"#
        );
    }

    #[test]
    fn test_false_is_overwritten_in_place() {
        let out = normalize(r#"{"model":"llama3","stream":false,"prompt":"hi"}"#);
        assert_eq!(out, r#"{"model":"llama3","stream":true,"prompt":"hi"}"#);
    }

    #[test]
    fn test_non_boolean_stream_is_replaced() {
        let out = normalize(r#"{"stream":"yes please","model":"m"}"#);
        assert_eq!(out, r#"{"stream":true,"model":"m"}"#);

        let out = normalize(r#"{"stream":null}"#);
        assert_eq!(out, r#"{"stream":true}"#);
    }

    #[test]
    fn test_already_normalized_is_noop() {
        let input = r#"{"model":"llama3","stream":true,"keep_alive":"5m"}"#;
        let once = normalize(input);
        assert_eq!(once, input);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_numbers_and_nesting_survive() {
        let input = r#"{"options":{"top_p":0.90,"seed":12345678901234567890,"num_ctx":4096},"format":{"type":"object","properties":{"z":{},"a":{}}},"images":[]}"#;
        let out = normalize(input);
        assert_eq!(
            out,
            r#"{"options":{"top_p":0.90,"seed":12345678901234567890,"num_ctx":4096},"format":{"type":"object","properties":{"z":{},"a":{}}},"images":[],"stream":true}"#
        );
    }

    #[test]
    fn test_empty_object() {
        assert_eq!(normalize("{}"), r#"{"stream":true}"#);
    }

    #[test]
    fn test_rejects_non_objects() {
        for input in ["[1,2,3]", "\"prompt\"", "42", "null", "true"] {
            let err = force_streaming(input.as_bytes()).unwrap_err();
            assert!(
                matches!(err, ProxyError::MalformedRequest(_)),
                "{} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = force_streaming(br#"{"model": "llama3""#).unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));

        let err = force_streaming(b"").unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }
}

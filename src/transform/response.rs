//! Non-streaming response envelope unwrapping.
//!
//! The internal backend wraps every payload as `{"response": ...}`. The
//! plugin's caller expects the bare payload, so the wrapper is peeled off
//! here. Unwrapping is strictly best-effort: a body that is not JSON, or
//! JSON without the envelope key, passes through byte-for-byte.

use serde_json::Value;
use tracing::debug;

/// Pull the payload out of a `{"response": ...}` envelope value.
///
/// Returns `None` when the value is not an enveloped object; the caller
/// keeps the original in that case.
pub(crate) fn unwrap_envelope_value(value: Value) -> Option<Value> {
    match value {
        Value::Object(mut map) => map.remove("response"),
        _ => None,
    }
}

/// Unwrap an enveloped response body, if it is one.
///
/// `None` means "pass the original through" — covering non-JSON bodies,
/// JSON without the envelope, and serialization failures alike. Status
/// and headers are never touched here.
pub fn unwrap_response_body(body: &[u8]) -> Option<Vec<u8>> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let inner = unwrap_envelope_value(value)?;
    match serde_json::to_vec(&inner) {
        Ok(bytes) => {
            debug!("Unwrapped response envelope");
            Some(bytes)
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enveloped_body_is_unwrapped() {
        let body = br#"{"response":{"candidates":[{"content":"hi"}]}}"#;
        let unwrapped = unwrap_response_body(body).unwrap();
        let value: Value = serde_json::from_slice(&unwrapped).unwrap();
        assert!(value.get("candidates").is_some());
        assert!(value.get("response").is_none());
    }

    #[test]
    fn test_body_without_envelope_passes_through() {
        let body = br#"{"candidates":[]}"#;
        assert!(unwrap_response_body(body).is_none());
    }

    #[test]
    fn test_non_json_body_passes_through() {
        assert!(unwrap_response_body(b"<html>451</html>").is_none());
    }

    #[test]
    fn test_non_object_json_passes_through() {
        assert!(unwrap_response_body(b"[1,2,3]").is_none());
    }

    #[test]
    fn test_envelope_with_null_payload_unwraps_to_null() {
        let unwrapped = unwrap_response_body(br#"{"response":null}"#).unwrap();
        assert_eq!(unwrapped, b"null");
    }
}

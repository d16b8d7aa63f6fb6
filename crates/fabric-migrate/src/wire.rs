//! Boundary parsing for Fabric control-plane JSON.
//!
//! Response shapes are normalized here once; the rest of the crate only sees
//! the typed structures from [`crate::model`] and classified [`Error`]s.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{truncate_body, Error};
use crate::model::{OperationStatus, ResourceRecord};

/// Definition part holding the copy-job content.
pub const CONTENT_PART_PATH: &str = "copyjob-content.json";

/// Payload type used for inline definition parts.
pub const INLINE_BASE64: &str = "InlineBase64";

const NOT_AVAILABLE_YET_CODES: &[&str] = &["ItemDisplayNameNotAvailableYet"];
const CONFLICT_CODES: &[&str] = &["ItemDisplayNameAlreadyInUse", "DuplicateConnectionName"];

/// Fabric error body, e.g. `{"errorCode": "...", "message": "..."}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: Option<String>,
    #[allow(dead_code)]
    message: Option<String>,
}

/// One part of an item definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionPart {
    /// Part path inside the item.
    pub path: String,
    /// Encoded payload.
    pub payload: String,
    /// Payload encoding.
    pub payload_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Definition {
    #[serde(default)]
    parts: Vec<DefinitionPart>,
}

/// Request/response envelope of the definition endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DefinitionEnvelope {
    definition: Definition,
}

/// Parses a response body: empty → empty object, invalid JSON → string.
#[must_use]
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Normalizes a resource object.
#[must_use]
pub fn parse_resource(value: &Value) -> ResourceRecord {
    let id = ["id", "warehouseId"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let display_name = value
        .get("displayName")
        .and_then(Value::as_str)
        .map(str::to_string);
    ResourceRecord {
        id,
        display_name,
        raw: value.clone(),
    }
}

/// Normalizes a list page into records and an optional continuation URL.
#[must_use]
pub fn parse_resource_page(value: &Value) -> (Vec<ResourceRecord>, Option<String>) {
    let items: &[Value] = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("value") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    let records = items
        .iter()
        .filter(|v| v.is_object())
        .map(parse_resource)
        .collect();
    let continuation = value
        .get("continuationUri")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    (records, continuation)
}

/// Reads `status` (or `state`) from an operation body.
///
/// # Errors
///
/// Returns [`Error::ProtocolViolation`] when neither field is a string.
pub fn parse_operation_status(value: &Value, url: &str) -> Result<OperationStatus, Error> {
    ["status", "state"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(OperationStatus::parse)
        .ok_or_else(|| {
            Error::ProtocolViolation(format!(
                "operation body from {url} has no status/state field: {}",
                truncate_body(&value.to_string())
            ))
        })
}

/// Classifies a non-success control-plane response.
#[must_use]
pub fn classify_error(status: u16, url: &str, body: &str) -> Error {
    let code = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error_code);
    let truncated = truncate_body(body);

    let code_matches = |codes: &[&str]| {
        code.as_deref().is_some_and(|c| codes.contains(&c)) || codes.iter().any(|c| body.contains(c))
    };

    if code_matches(NOT_AVAILABLE_YET_CODES) {
        return Error::NameNotYetAvailable {
            display_name: String::new(),
            body: truncated,
        };
    }
    if status == 409 || code_matches(CONFLICT_CODES) {
        return Error::Conflict {
            status,
            url: url.to_string(),
            body: truncated,
        };
    }
    Error::Api {
        status,
        url: url.to_string(),
        code,
        body: truncated,
    }
}

/// Classifies a failed or cancelled operation from its poll body.
///
/// Name-availability and name-in-use codes map to the same errors a
/// synchronous create raises; conflicts found this way carry status 409.
#[must_use]
pub fn classify_failed_operation(value: &Value, url: &str, status: &str) -> Error {
    let code = value
        .get("error")
        .and_then(|e| e.get("errorCode"))
        .or_else(|| value.get("errorCode"))
        .and_then(Value::as_str);
    let text = value.to_string();
    let truncated = truncate_body(&text);

    let code_matches = |codes: &[&str]| {
        code.is_some_and(|c| codes.contains(&c)) || codes.iter().any(|c| text.contains(c))
    };

    if code_matches(NOT_AVAILABLE_YET_CODES) {
        return Error::NameNotYetAvailable {
            display_name: String::new(),
            body: truncated,
        };
    }
    if code_matches(CONFLICT_CODES) {
        return Error::Conflict {
            status: 409,
            url: url.to_string(),
            body: truncated,
        };
    }
    Error::OperationFailed {
        url: url.to_string(),
        status: status.to_string(),
        body: truncated,
    }
}

/// Wraps copy-job content into an `updateDefinition` request body.
#[must_use]
pub fn encode_definition(content: &Value) -> Value {
    let envelope = DefinitionEnvelope {
        definition: Definition {
            parts: vec![DefinitionPart {
                path: CONTENT_PART_PATH.to_string(),
                payload: BASE64.encode(content.to_string()),
                payload_type: INLINE_BASE64.to_string(),
            }],
        },
    };
    serde_json::to_value(envelope).unwrap_or(Value::Null)
}

/// Extracts the copy-job content object from a `getDefinition` response.
///
/// Returns `None` when the part is missing, not inline base64, or not a JSON object.
#[must_use]
pub fn decode_definition_content(value: &Value) -> Option<Map<String, Value>> {
    let envelope: DefinitionEnvelope = serde_json::from_value(value.clone()).ok()?;
    let part = envelope
        .definition
        .parts
        .into_iter()
        .find(|p| p.path == CONTENT_PART_PATH)?;
    if part.payload_type != INLINE_BASE64 || part.payload.is_empty() {
        return None;
    }
    let raw = BASE64.decode(part.payload.as_bytes()).ok()?;
    match serde_json::from_slice::<Value>(&raw).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body_empty_and_text() {
        assert_eq!(parse_body(""), json!({}));
        assert_eq!(parse_body("  "), json!({}));
        assert_eq!(parse_body("not json"), json!("not json"));
        assert_eq!(parse_body(r#"{"id":"1"}"#), json!({"id": "1"}));
    }

    #[test]
    fn test_parse_resource_id_variants() {
        let a = parse_resource(&json!({"id": "abc", "displayName": "W1"}));
        let b = parse_resource(&json!({"warehouseId": "xyz", "displayName": "W1"}));
        let c = parse_resource(&json!({"id": "", "displayName": "W1"}));

        assert_eq!(a.id.as_deref(), Some("abc"));
        assert_eq!(a.display_name.as_deref(), Some("W1"));
        assert_eq!(b.id.as_deref(), Some("xyz"));
        assert!(c.id.is_none());
    }

    #[test]
    fn test_parse_resource_page_shapes() {
        let (records, next) = parse_resource_page(&json!({
            "value": [{"id": "1", "displayName": "A"}, "junk", {"id": "2"}],
            "continuationUri": "https://api/next"
        }));
        assert_eq!(records.len(), 2);
        assert_eq!(next.as_deref(), Some("https://api/next"));

        let (records, next) = parse_resource_page(&json!([{"id": "1"}]));
        assert_eq!(records.len(), 1);
        assert!(next.is_none());

        let (records, _) = parse_resource_page(&json!({"unexpected": true}));
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_operation_status_variants() {
        let s = parse_operation_status(&json!({"status": "Succeeded"}), "u").unwrap();
        assert_eq!(s, OperationStatus::Succeeded);

        let s = parse_operation_status(&json!({"state": "Running"}), "u").unwrap();
        assert!(!s.is_terminal());

        let err = parse_operation_status(&json!({"percentComplete": 50}), "u").unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn test_classify_not_available_yet() {
        let body = r#"{"errorCode":"ItemDisplayNameNotAvailableYet","message":"later"}"#;
        let err = classify_error(400, "https://api/w", body);
        assert!(matches!(err, Error::NameNotYetAvailable { .. }));
    }

    #[test]
    fn test_classify_conflict_by_code_and_status() {
        let body = r#"{"errorCode":"ItemDisplayNameAlreadyInUse","message":"taken"}"#;
        assert!(matches!(classify_error(400, "u", body), Error::Conflict { .. }));
        assert!(matches!(
            classify_error(400, "u", r#"{"errorCode":"DuplicateConnectionName"}"#),
            Error::Conflict { .. }
        ));
        assert!(matches!(classify_error(409, "u", ""), Error::Conflict { .. }));
    }

    #[test]
    fn test_classify_other_keeps_code_and_truncates() {
        let long = format!(r#"{{"errorCode":"InvalidDefinition","message":"{}"}}"#, "x".repeat(5000));
        match classify_error(400, "https://api/x", &long) {
            Error::Api { status, code, body, .. } => {
                assert_eq!(status, 400);
                assert_eq!(code.as_deref(), Some("InvalidDefinition"));
                assert!(body.len() < 2100);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_failed_operation_codes() {
        let taken = json!({"status": "Failed", "error": {"errorCode": "ItemDisplayNameAlreadyInUse"}});
        let pending = json!({"status": "Failed", "error": {"errorCode": "ItemDisplayNameNotAvailableYet"}});
        let other = json!({"status": "Failed", "error": {"errorCode": "CapacityNotActive"}});

        assert!(matches!(
            classify_failed_operation(&taken, "u", "Failed"),
            Error::Conflict { status: 409, .. }
        ));
        assert!(matches!(
            classify_failed_operation(&pending, "u", "Failed"),
            Error::NameNotYetAvailable { .. }
        ));
        match classify_failed_operation(&other, "https://api/op/1", "Failed") {
            Error::OperationFailed { url, status, body } => {
                assert_eq!(url, "https://api/op/1");
                assert_eq!(status, "Failed");
                assert!(body.contains("CapacityNotActive"));
            }
            e => panic!("unexpected error: {e:?}"),
        }
    }

    #[test]
    fn test_definition_encode_decode() {
        let content = json!({"properties": {"jobMode": "Batch"}, "activities": []});

        let envelope = encode_definition(&content);
        let part = &envelope["definition"]["parts"][0];
        assert_eq!(part["path"], CONTENT_PART_PATH);
        assert_eq!(part["payloadType"], INLINE_BASE64);

        let decoded = decode_definition_content(&envelope).unwrap();
        assert_eq!(decoded["properties"]["jobMode"], "Batch");
    }

    #[test]
    fn test_decode_definition_rejects_other_payload_types() {
        let value = json!({"definition": {"parts": [
            {"path": CONTENT_PART_PATH, "payload": "e30=", "payloadType": "Reference"}
        ]}});
        assert!(decode_definition_content(&value).is_none());
        assert!(decode_definition_content(&json!({})).is_none());
    }
}

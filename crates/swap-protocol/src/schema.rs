//! Pure shape validation of a parsed wire message.
//!
//! `validate_shape` never touches the network and never mutates its input;
//! it only inspects a [`serde_json::Value`]. Validation happens in two
//! passes: first the envelope is checked for coherence, then the
//! kind-specific plaintext fields are checked for presence/type -- unless
//! the message carries a `security` block that has absorbed them into
//! ciphertext, in which case their absence is accepted.

use crate::ids::MIN_SOURCE_ID_LEN;
use crate::message::PROTOCOL_VERSION;
use serde_json::Value;

const KNOWN_KINDS: &[&str] = &[
    "register",
    "response",
    "connect",
    "accept",
    "reject",
    "update",
    "close",
    "application",
];

/// Kinds whose payload is closed (unknown extra top-level fields are a
/// schema error). `response` and `application` are extensible.
const EXTENSIBLE_KINDS: &[&str] = &["response", "application"];

const ENVELOPE_FIELDS: &[&str] = &["version", "source_id", "message_id", "message_type", "security"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn fail(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Returns `true` if `message` carries a `security` block whose ciphertext
/// is populated, meaning kind-specific plaintext fields may legitimately be
/// absent from the top level.
fn payload_is_secured(message: &Value) -> bool {
    message
        .get("security")
        .and_then(|s| s.get("ciphertext"))
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

fn required_fields(kind: &str) -> &'static [&'static str] {
    match kind {
        "register" => &["criteria"],
        "response" => &["response_to", "status", "reason"],
        "connect" => &["offer", "criteria"],
        "accept" => &["target", "answer"],
        "reject" => &["target", "reason"],
        "update" => &["target", "sdp"],
        "close" => &["target"],
        "application" => &["target", "type", "value"],
        _ => &[],
    }
}

fn allowed_fields(kind: &str) -> Vec<&'static str> {
    match kind {
        "register" => vec!["criteria", "capabilities"],
        "response" => vec!["response_to", "status", "reason", "error"],
        "connect" => vec!["offer", "criteria"],
        "accept" => vec!["target", "answer"],
        "reject" => vec!["target", "reason"],
        "update" => vec!["target", "sdp"],
        "close" => vec!["target"],
        "application" => vec!["target", "type", "value"],
        _ => vec![],
    }
}

/// Validates the shape of a parsed wire message. Pure: no I/O, no mutation.
pub fn validate_shape(message: &Value) -> ValidationResult {
    let mut errors = Vec::new();

    let Some(obj) = message.as_object() else {
        return ValidationResult::fail(vec!["message is not a JSON object".to_owned()]);
    };

    match obj.get("version") {
        Some(Value::Number(n)) if n.as_u64() == Some(u64::from(PROTOCOL_VERSION)) => {}
        Some(other) => errors.push(format!("version must be {PROTOCOL_VERSION}, got {other}")),
        None => errors.push("missing required field: version".to_owned()),
    }

    match obj.get("source_id") {
        Some(Value::String(s)) if s.len() >= MIN_SOURCE_ID_LEN => {}
        Some(Value::String(s)) => errors.push(format!(
            "source_id must be at least {MIN_SOURCE_ID_LEN} characters, got {}",
            s.len()
        )),
        Some(_) => errors.push("source_id must be a string".to_owned()),
        None => errors.push("missing required field: source_id".to_owned()),
    }

    match obj.get("message_id") {
        Some(Value::Number(n)) if n.as_u64().is_some_and(|v| v > 0) => {}
        Some(_) => errors.push("message_id must be a positive integer".to_owned()),
        None => errors.push("missing required field: message_id".to_owned()),
    }

    let kind = match obj.get("message_type") {
        Some(Value::String(s)) if KNOWN_KINDS.contains(&s.as_str()) => Some(s.as_str()),
        Some(Value::String(s)) => {
            errors.push(format!("unknown message_type: {s}"));
            None
        }
        Some(_) => {
            errors.push("message_type must be a string".to_owned());
            None
        }
        None => {
            errors.push("missing required field: message_type".to_owned());
            None
        }
    };

    if let Some(kind) = kind {
        let secured = payload_is_secured(message);
        if !secured {
            for field in required_fields(kind) {
                if !obj.contains_key(*field) {
                    errors.push(format!("{kind} is missing required field: {field}"));
                }
            }
        }

        if !EXTENSIBLE_KINDS.contains(&kind) {
            let allowed = allowed_fields(kind);
            for key in obj.keys() {
                if ENVELOPE_FIELDS.contains(&key.as_str()) {
                    continue;
                }
                if secured {
                    // Plaintext fields were absorbed into ciphertext; any
                    // top-level field besides the envelope is unexpected.
                    errors.push(format!("unexpected field for secured {kind}: {key}"));
                } else if !allowed.contains(&key.as_str()) {
                    errors.push(format!("unexpected field for {kind}: {key}"));
                }
            }
        }
    }

    if errors.is_empty() {
        ValidationResult::ok()
    } else {
        ValidationResult::fail(errors)
    }
}

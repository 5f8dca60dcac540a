//! Constructs typed [`Message`] values from a parsed JSON object.
//!
//! Switches on `message_type`; an unrecognized kind fails with
//! [`ProblemDetails::message_unknown`] rather than a generic parse error.

use crate::message::{Message, ProblemDetails};
use serde_json::Value;

/// Parses a [`Value`] into a typed [`Message`].
///
/// Returns `message_unknown` when `message_type` is absent or not one of
/// the eight known kinds (serde's tagged-enum deserialization already
/// rejects unknown tags; this just gives that failure the problem-details
/// shape the relay needs to report back to the sender).
pub fn build_message(value: &Value) -> Result<Message, ProblemDetails> {
    serde_json::from_value(value.clone()).map_err(|e| {
        let kind = value.get("message_type").and_then(Value::as_str);
        match kind {
            Some(kind) if !is_known_kind(kind) => {
                ProblemDetails::message_unknown(format!("unknown message_type: {kind}"))
            }
            _ => ProblemDetails::message_malformatted(e.to_string()),
        }
    })
}

fn is_known_kind(kind: &str) -> bool {
    matches!(
        kind,
        "register" | "response" | "connect" | "accept" | "reject" | "update" | "close" | "application"
    )
}

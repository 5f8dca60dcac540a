//! Canonical form: JSON serialized with recursively sorted object keys.
//!
//! Used as the deterministic input to HMAC signing, and as the identity
//! representation for criterion values. Arrays preserve order; only object
//! keys are sorted.

use serde_json::Value;
use std::collections::BTreeMap;

/// Serializes `value` to a byte string with every object's keys sorted
/// lexicographically, recursively. Numbers/strings/bools/null use standard
/// JSON encoding; arrays preserve their original order.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

pub fn to_canonical_string(value: &Value) -> String {
    String::from_utf8(to_canonical_bytes(value)).expect("canonical JSON is always valid UTF-8")
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push(b'{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(&Value::String(k.clone()), out);
                out.push(b':');
                write_canonical(v, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        other => {
            // Primitives serialize identically regardless of key order.
            let s = serde_json::to_string(other).expect("primitive JSON value always serializes");
            out.extend_from_slice(s.as_bytes());
        }
    }
}

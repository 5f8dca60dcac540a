//! Source identifiers and per-source message-id counters.

use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Minimum length of a `source_id` (and of a `target` field), a wire
/// invariant every endpoint identifier must satisfy.
pub const MIN_SOURCE_ID_LEN: usize = 10;

/// Generates `prefix + "-" + random_hex`, padded so the result is always
/// at least [`MIN_SOURCE_ID_LEN`] characters and practically unique.
pub fn generate_source_id(prefix: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex = hex::encode(bytes);
    let mut id = format!("{prefix}-{hex}");
    while id.len() < MIN_SOURCE_ID_LEN {
        id.push('0');
    }
    id
}

/// A per-source monotonic counter for `message_id`.
///
/// Counters are never shared across sources: each `MessageIdCounter` tracks
/// exactly one source.
#[derive(Debug, Default)]
pub struct MessageIdCounter {
    current: AtomicU64,
}

impl MessageIdCounter {
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// Increments and returns the new message id. Always positive.
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A registry of counters keyed by `source_id`, for processes (like the
/// relay) that need to mint ids on behalf of many sources at once (e.g.
/// synthesized `close` messages authored by a disconnected peer).
#[derive(Debug, Default)]
pub struct MessageIdRegistry {
    counters: Mutex<HashMap<String, MessageIdCounter>>,
}

impl MessageIdRegistry {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_for(&self, source_id: &str) -> u64 {
        let mut counters = self.counters.lock().expect("message id registry poisoned");
        counters
            .entry(source_id.to_owned())
            .or_insert_with(MessageIdCounter::new)
            .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_source_id_meets_minimum_length() {
        let id = generate_source_id("relay");
        assert!(id.len() >= MIN_SOURCE_ID_LEN);
        assert!(id.starts_with("relay-"));
    }

    #[test]
    fn generate_source_id_is_practically_unique() {
        let a = generate_source_id("ep");
        let b = generate_source_id("ep");
        assert_ne!(a, b);
    }

    #[test]
    fn message_id_counter_increases_strictly() {
        let counter = MessageIdCounter::new();
        let a = counter.next();
        let b = counter.next();
        let c = counter.next();
        assert!(a < b);
        assert!(b < c);
        assert!(a > 0);
    }

    #[test]
    fn message_id_registry_scopes_counters_per_source() {
        let registry = MessageIdRegistry::new();
        let a1 = registry.next_for("source-a-1");
        let a2 = registry.next_for("source-a-1");
        let b1 = registry.next_for("source-b-1");
        assert_eq!(a1, 1);
        assert_eq!(a2, 2);
        assert_eq!(b1, 1, "distinct sources get independent counters");
    }
}

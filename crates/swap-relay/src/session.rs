//! The session manager: unordered pair keys for active peer-to-peer
//! sessions. Does not own endpoint transports -- only the relationship.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub a: String,
    pub b: String,
    pub created_at_unix_secs: u64,
}

/// Sorts the pair and joins it with `|`, so `(a, b)` and `(b, a)` produce
/// the same key.
pub fn session_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}|{b}")
    } else {
        format!("{b}|{a}")
    }
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<String, SessionEntry>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session for `(a, b)`. Idempotent by key: re-creating an
    /// existing session leaves its original `created_at` untouched.
    pub fn create(&mut self, a: &str, b: &str) -> SessionEntry {
        let key = session_key(a, b);
        self.sessions
            .entry(key)
            .or_insert_with(|| SessionEntry {
                a: a.to_owned(),
                b: b.to_owned(),
                created_at_unix_secs: now_unix_secs(),
            })
            .clone()
    }

    pub fn get(&self, a: &str, b: &str) -> Option<&SessionEntry> {
        self.sessions.get(&session_key(a, b))
    }

    pub fn remove(&mut self, a: &str, b: &str) -> Option<SessionEntry> {
        self.sessions.remove(&session_key(a, b))
    }

    /// All sessions `endpoint` participates in.
    pub fn list_for(&self, endpoint: &str) -> Vec<&SessionEntry> {
        self.sessions
            .values()
            .filter(|s| s.a == endpoint || s.b == endpoint)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_is_symmetric() {
        assert_eq!(session_key("a", "b"), session_key("b", "a"));
    }

    #[test]
    fn create_is_idempotent_by_key() {
        let mut mgr = SessionManager::new();
        let first = mgr.create("endpoint-a", "endpoint-b");
        let second = mgr.create("endpoint-b", "endpoint-a");
        assert_eq!(first.created_at_unix_secs, second.created_at_unix_secs);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn get_and_remove_are_order_independent() {
        let mut mgr = SessionManager::new();
        mgr.create("endpoint-a", "endpoint-b");
        assert!(mgr.get("endpoint-b", "endpoint-a").is_some());
        let removed = mgr.remove("endpoint-b", "endpoint-a");
        assert!(removed.is_some());
        assert!(mgr.is_empty());
    }

    #[test]
    fn list_for_finds_all_sessions_for_an_endpoint() {
        let mut mgr = SessionManager::new();
        mgr.create("endpoint-a", "endpoint-b");
        mgr.create("endpoint-a", "endpoint-c");
        mgr.create("endpoint-x", "endpoint-y");
        let sessions = mgr.list_for("endpoint-a");
        assert_eq!(sessions.len(), 2);
    }
}

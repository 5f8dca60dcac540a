//! Correlates outbound requests expecting a `response` with the inbound
//! response that resolves them, on a per-`message_id` basis.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use swap_protocol::message::{Message, ProblemDetails};
use tokio::sync::oneshot;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum PendingError {
    #[error("no response within the configured timeout")]
    Timeout,
    #[error("request failed: {0:?}")]
    Failed(ProblemDetails),
    #[error("pending entry was cancelled")]
    Cancelled,
}

pub(crate) enum Outcome {
    Ok(Message),
    Err(ProblemDetails),
}

/// The set of outbound requests awaiting a correlated `response`, keyed by
/// the request's own `message_id`.
pub struct PendingTable {
    entries: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Registers a new pending entry for `message_id`, returning the
    /// receiving half to pass to [`Self::await_response`].
    pub fn register(&self, message_id: u64) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().expect("pending table poisoned").insert(message_id, tx);
        rx
    }

    /// Resolves the pending entry for `response_to`, if one is still
    /// registered. A status in `200..300` resolves successfully with
    /// `completion`; otherwise it resolves as a failure carrying `error`
    /// (falling back to a synthesized problem if the relay omitted one).
    pub fn complete(&self, response_to: u64, status: i32, error: Option<ProblemDetails>, completion: Message) {
        let Some(tx) = self.entries.lock().expect("pending table poisoned").remove(&response_to) else {
            return;
        };
        let outcome = if (200..300).contains(&status) {
            Outcome::Ok(completion)
        } else {
            Outcome::Err(error.unwrap_or_else(|| ProblemDetails {
                kind: "about:blank".to_owned(),
                title: "request failed".to_owned(),
                status: u16::try_from(status).unwrap_or(0),
                detail: String::new(),
            }))
        };
        let _ = tx.send(outcome);
    }

    /// Cancels every outstanding entry, e.g. on transport close. Waiters
    /// observe [`PendingError::Cancelled`].
    pub fn cancel_all(&self) {
        let mut entries = self.entries.lock().expect("pending table poisoned");
        entries.clear();
    }

    /// Awaits `rx` with `timeout`, translating a dropped sender (from
    /// [`Self::cancel_all`]) or an elapsed deadline into [`PendingError`].
    pub async fn await_response(
        &self,
        message_id: u64,
        rx: oneshot::Receiver<Outcome>,
        timeout: Duration,
    ) -> Result<Message, PendingError> {
        let result = tokio::time::timeout(timeout, rx).await;
        match result {
            Ok(Ok(Outcome::Ok(message))) => Ok(message),
            Ok(Ok(Outcome::Err(problem))) => Err(PendingError::Failed(problem)),
            Ok(Err(_)) => Err(PendingError::Cancelled),
            Err(_) => {
                self.entries.lock().expect("pending table poisoned").remove(&message_id);
                Err(PendingError::Timeout)
            }
        }
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

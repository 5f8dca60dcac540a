//! Shared relay state: a single registry keyed by `source_id` unifying
//! routing table, matcher registration, and advertised capabilities, the
//! session manager, and pending-connect bookkeeping.
//!
//! All mutation happens behind one [`std::sync::Mutex`] so that each
//! dispatch's reads and writes appear atomic with respect to concurrent
//! dispatches and transport close. The lock is only ever held for
//! synchronous map operations -- crypto and I/O always happen outside it.

use crate::session::SessionManager;
use std::collections::HashMap;
use std::sync::Mutex;
use swap_protocol::message::Capabilities;
use swap_protocol::Criterion;
use tokio::sync::mpsc;

/// A pre-serialized JSON text frame queued for delivery to one endpoint.
pub type OutboundTx = mpsc::UnboundedSender<String>;
pub type OutboundRx = mpsc::UnboundedReceiver<String>;

#[derive(Clone)]
struct Endpoint {
    outbound: OutboundTx,
    /// `None` until the endpoint sends `register`.
    criteria: Option<Vec<Criterion>>,
    capabilities: Capabilities,
}

#[derive(Debug, Clone)]
pub struct PendingConnect {
    pub target: String,
    pub offer: String,
    pub message_id: u64,
}

struct Inner {
    endpoints: HashMap<String, Endpoint>,
    sessions: SessionManager,
    pending_connects: HashMap<String, PendingConnect>,
}

pub struct RelayState {
    inner: Mutex<Inner>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                endpoints: HashMap::new(),
                sessions: SessionManager::new(),
                pending_connects: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("relay state mutex poisoned")
    }

    /// Ensures an entry for `source_id` exists in the routing table,
    /// without disturbing any criteria/capabilities already on file.
    pub fn touch_transport(&self, source_id: &str, outbound: OutboundTx) {
        let mut inner = self.lock();
        inner.endpoints.entry(source_id.to_owned()).or_insert(Endpoint {
            outbound,
            criteria: None,
            capabilities: Capabilities::default(),
        });
    }

    /// Upserts a registration: replaces any prior criteria/capabilities for
    /// this `source_id` (re-register replaces, per spec).
    pub fn register(
        &self,
        source_id: &str,
        outbound: OutboundTx,
        criteria: Vec<Criterion>,
        capabilities: Capabilities,
    ) {
        let mut inner = self.lock();
        inner.endpoints.insert(
            source_id.to_owned(),
            Endpoint {
                outbound,
                criteria: Some(criteria),
                capabilities,
            },
        );
    }

    pub fn outbound_for(&self, source_id: &str) -> Option<OutboundTx> {
        self.lock().endpoints.get(source_id).map(|e| e.outbound.clone())
    }

    pub fn capabilities_for(&self, source_id: &str) -> Option<Capabilities> {
        self.lock().endpoints.get(source_id).map(|e| e.capabilities.clone())
    }

    /// Snapshot of `(endpoint_id, criteria)` for every endpoint that has
    /// registered criteria, for the matching engine to search over.
    pub fn registered_criteria(&self) -> Vec<(String, Vec<Criterion>)> {
        self.lock()
            .endpoints
            .iter()
            .filter_map(|(id, e)| e.criteria.clone().map(|c| (id.clone(), c)))
            .collect()
    }

    pub fn set_pending_connect(&self, requestor: &str, pending: PendingConnect) {
        self.lock().pending_connects.insert(requestor.to_owned(), pending);
    }

    pub fn take_pending_connect(&self, requestor: &str) -> Option<PendingConnect> {
        self.lock().pending_connects.remove(requestor)
    }

    pub fn create_session(&self, a: &str, b: &str) {
        self.lock().sessions.create(a, b);
    }

    pub fn remove_session(&self, a: &str, b: &str) -> bool {
        self.lock().sessions.remove(a, b).is_some()
    }

    pub fn has_session(&self, a: &str, b: &str) -> bool {
        self.lock().sessions.get(a, b).is_some()
    }

    /// Removes `source_id` from the routing table, registration, and every
    /// session it participates in, atomically. Returns the peers that were
    /// in a torn-down session, each needing a synthesized `close` sent to
    /// it, along with their capabilities (for the caller to apply security
    /// outside the lock) and outbound channel.
    pub fn disconnect(&self, source_id: &str) -> Vec<(String, OutboundTx, Capabilities)> {
        let mut inner = self.lock();
        inner.endpoints.remove(source_id);
        inner.pending_connects.remove(source_id);

        let sessions = inner.sessions.list_for(source_id);
        let peers: Vec<String> = sessions
            .into_iter()
            .map(|s| if s.a == source_id { s.b.clone() } else { s.a.clone() })
            .collect();

        let mut results = Vec::new();
        for peer in &peers {
            inner.sessions.remove(source_id, peer);
            if let Some(endpoint) = inner.endpoints.get(peer) {
                results.push((peer.clone(), endpoint.outbound.clone(), endpoint.capabilities.clone()));
            }
        }
        results
    }

    pub fn registered_endpoint_count(&self) -> usize {
        self.lock().endpoints.values().filter(|e| e.criteria.is_some()).count()
    }

    pub fn active_session_count(&self) -> usize {
        self.lock().sessions.len()
    }
}

//! Event fan-out on the client: a fixed set of typed callbacks invoked by
//! the inbound demultiplexer, preferred here over a single dynamically
//! dispatched event type.

use serde_json::Value;
use std::sync::Arc;
use swap_protocol::message::ProblemDetails;

type ConnectCb = Arc<dyn Fn(String, String) + Send + Sync>;
type AcceptCb = Arc<dyn Fn(String, String) + Send + Sync>;
type RejectCb = Arc<dyn Fn(String, String) + Send + Sync>;
type UpdateCb = Arc<dyn Fn(String, String) + Send + Sync>;
type CloseCb = Arc<dyn Fn(String) + Send + Sync>;
type ApplicationCb = Arc<dyn Fn(String, Value, String) + Send + Sync>;
type ErrorCb = Arc<dyn Fn(ProblemDetails) + Send + Sync>;

/// The client core's event sink: `{on_connect, on_accept, on_reject,
/// on_update, on_close, on_application, on_error}`. Any slot left `None`
/// silently drops that event. Callbacks run synchronously on the
/// connection actor's task and must not block.
#[derive(Clone, Default)]
pub struct EventHandlers {
    /// `(offer, source_id)` for an inbound `connect`.
    pub on_connect: Option<ConnectCb>,
    /// `(answer, source_id)` for an inbound `accept`.
    pub on_accept: Option<AcceptCb>,
    /// `(reason, source_id)` for an inbound `reject`.
    pub on_reject: Option<RejectCb>,
    /// `(sdp, source_id)` for an inbound `update`.
    pub on_update: Option<UpdateCb>,
    /// `(source_id)` for an inbound `close`.
    pub on_close: Option<CloseCb>,
    /// `(app_type, value, source_id)` for an inbound `application`.
    pub on_application: Option<ApplicationCb>,
    /// An unsolicited error from the relay (`response_to = 0`), not
    /// correlated with any pending request.
    pub on_error: Option<ErrorCb>,
}

/// Returned when an outbound send is disallowed in the client's current
/// state. The transport is never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot send '{kind}' while in state '{state}'")]
pub struct SendRejected {
    pub kind: &'static str,
    pub state: &'static str,
}

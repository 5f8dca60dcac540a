//! The per-connection dispatch core: parse, unpack the security envelope,
//! validate shape, dispatch by message kind, forward/ack/error, and pack
//! the envelope back up on the way out.
//!
//! A [`RelayCore`] is shared (cloned, cheaply, via `Arc` fields) across all
//! connection tasks; [`RelayCore::handle_frame`] is the single entry point
//! each connection's read loop calls for every inbound text frame.

use crate::matching::{self, Candidate};
use crate::state::RelayState;
use std::sync::Arc;
use swap_protocol::message::{Capabilities, MessageBody, ProblemDetails};
use swap_protocol::{build_message, validate_shape, CryptoContext, Message, MessageIdRegistry};
use tracing::{info, warn};

/// Outbound work produced by one dispatch: the (already-built, not yet
/// secured) message to send back to the sender, and a list of
/// (`target_id`, message) pairs to forward to other connections.
pub struct Dispatch {
    pub to_sender: Option<Message>,
    pub to_targets: Vec<(String, Message)>,
}

impl Dispatch {
    fn only_sender(msg: Message) -> Self {
        Self {
            to_sender: Some(msg),
            to_targets: Vec::new(),
        }
    }

    fn none() -> Self {
        Self {
            to_sender: None,
            to_targets: Vec::new(),
        }
    }
}

pub struct RelayCore {
    pub state: Arc<RelayState>,
    pub crypto: Option<Arc<CryptoContext>>,
    pub relay_source_id: String,
    pub ids: MessageIdRegistry,
}

impl RelayCore {
    pub fn new(state: Arc<RelayState>, crypto: Option<Arc<CryptoContext>>, relay_source_id: String) -> Self {
        Self {
            state,
            crypto,
            relay_source_id,
            ids: MessageIdRegistry::new(),
        }
    }

    /// Handles one inbound text frame from `sender_id`. Returns the
    /// messages to write back out: at most one to the sender, plus zero or
    /// more forwarded to other endpoints. The caller is responsible for
    /// applying per-recipient security and serializing before writing to
    /// each recipient's transport.
    pub fn handle_frame(&self, sender_id: &str, raw: &str) -> Dispatch {
        let mut value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(%sender_id, error = %e, "dropping frame: not valid JSON");
                return Dispatch::only_sender(self.error(0, ProblemDetails::message_malformatted(e.to_string())));
            }
        };

        if let Some(crypto) = &self.crypto {
            if value.get("security").is_some() {
                if let Err(e) = crypto.decrypt(sender_id, &mut value) {
                    let message_id = extract_message_id(&value);
                    warn!(%sender_id, error = %e, "envelope decrypt failed");
                    return Dispatch::only_sender(
                        self.error(message_id, ProblemDetails::message_malformatted(e.to_string())),
                    );
                }
                if value
                    .get("security")
                    .and_then(|s| s.get("signature"))
                    .is_some()
                {
                    match crypto.verify(&value) {
                        Ok(true) => {}
                        Ok(false) => {
                            let message_id = extract_message_id(&value);
                            warn!(%sender_id, "signature verification failed");
                            return Dispatch::only_sender(self.error(
                                message_id,
                                ProblemDetails::message_malformatted("signature verification failed"),
                            ));
                        }
                        Err(e) => {
                            let message_id = extract_message_id(&value);
                            warn!(%sender_id, error = %e, "signature verification error");
                            return Dispatch::only_sender(
                                self.error(message_id, ProblemDetails::message_malformatted(e.to_string())),
                            );
                        }
                    }
                }
            }
        }

        let validation = validate_shape(&value);
        if !validation.valid {
            let message_id = extract_message_id(&value);
            warn!(%sender_id, errors = ?validation.errors, "schema validation failed");
            return Dispatch::only_sender(self.error(
                message_id,
                ProblemDetails::message_malformatted(validation.errors.join("; ")),
            ));
        }

        let msg = match build_message(&value) {
            Ok(m) => m,
            Err(problem) => {
                let message_id = extract_message_id(&value);
                return Dispatch::only_sender(self.error(message_id, problem));
            }
        };

        self.dispatch(sender_id, msg)
    }

    fn dispatch(&self, sender_id: &str, msg: Message) -> Dispatch {
        match msg.body {
            MessageBody::Register { criteria, capabilities } => {
                let outbound = match self.state.outbound_for(sender_id) {
                    Some(tx) => tx,
                    None => return Dispatch::none(),
                };
                self.state.register(
                    sender_id,
                    outbound,
                    criteria,
                    capabilities.unwrap_or_default(),
                );
                info!(%sender_id, "endpoint registered");
                Dispatch::only_sender(Message::ack(&self.relay_source_id, msg.message_id))
            }

            MessageBody::Connect { offer, criteria } => self.dispatch_connect(sender_id, msg.message_id, offer, criteria),

            MessageBody::Accept { target, answer } => {
                if self.state.outbound_for(&target).is_none() {
                    return Dispatch::only_sender(self.error(
                        msg.message_id,
                        ProblemDetails::target_unknown(format!("no live transport for {target}")),
                    ));
                }
                self.state.create_session(sender_id, &target);
                self.state.take_pending_connect(&target);
                info!(%sender_id, %target, "session accepted");
                let forwarded = Message::new(
                    sender_id.to_owned(),
                    msg.message_id,
                    MessageBody::Accept { target: target.clone(), answer },
                );
                Dispatch {
                    to_sender: Some(Message::ack(&self.relay_source_id, msg.message_id)),
                    to_targets: vec![(target, forwarded)],
                }
            }

            MessageBody::Reject { target, reason } => {
                self.state.take_pending_connect(&target);
                self.forward_or_target_unknown(
                    sender_id,
                    msg.message_id,
                    target.clone(),
                    MessageBody::Reject { target, reason },
                )
            }

            MessageBody::Update { target, sdp } => self.forward_or_target_unknown(
                sender_id,
                msg.message_id,
                target.clone(),
                MessageBody::Update { target, sdp },
            ),

            MessageBody::Close { target } => {
                if self.state.remove_session(sender_id, &target) {
                    info!(%sender_id, %target, "session closed");
                }
                self.forward_or_target_unknown(
                    sender_id,
                    msg.message_id,
                    target.clone(),
                    MessageBody::Close { target },
                )
            }

            MessageBody::Application { target, app_type, value } => self.forward_or_target_unknown(
                sender_id,
                msg.message_id,
                target.clone(),
                MessageBody::Application { target, app_type, value },
            ),

            MessageBody::Response { .. } => Dispatch::none(),
        }
    }

    /// Forwards `body` (already carrying `target`) to `target` verbatim
    /// under `sender_id`'s identity, or returns `target_unknown` if it has
    /// no live transport.
    fn forward_or_target_unknown(
        &self,
        sender_id: &str,
        message_id: u64,
        target: String,
        body: MessageBody,
    ) -> Dispatch {
        if self.state.outbound_for(&target).is_none() {
            return Dispatch::only_sender(self.error(
                message_id,
                ProblemDetails::target_unknown(format!("no live transport for {target}")),
            ));
        }
        let forwarded = Message::new(sender_id.to_owned(), message_id, body);
        Dispatch {
            to_sender: Some(Message::ack(&self.relay_source_id, message_id)),
            to_targets: vec![(target, forwarded)],
        }
    }

    fn dispatch_connect(
        &self,
        sender_id: &str,
        message_id: u64,
        offer: String,
        criteria: Vec<swap_protocol::Criterion>,
    ) -> Dispatch {
        let snapshot = self.state.registered_criteria();
        let candidates: Vec<Candidate> = snapshot
            .iter()
            .filter(|(id, _)| id != sender_id)
            .map(|(id, criteria)| Candidate {
                endpoint_id: id.as_str(),
                criteria,
            })
            .collect();

        let matched_ids = matching::find_matches(&candidates, &criteria);
        let weighted: Vec<(&str, usize)> = matched_ids
            .iter()
            .map(|id| {
                let count = snapshot
                    .iter()
                    .find(|(cid, _)| cid == id)
                    .map(|(_, c)| c.len())
                    .unwrap_or(0);
                (*id, count)
            })
            .collect();

        let Some(target) = matching::select(&weighted) else {
            return Dispatch::only_sender(self.error(
                message_id,
                ProblemDetails::target_unknown("no registered endpoint matches the requested criteria"),
            ));
        };

        if self.state.outbound_for(target).is_none() {
            return Dispatch::only_sender(self.error(
                message_id,
                ProblemDetails::target_unknown("matched endpoint has no live transport"),
            ));
        }

        self.state.set_pending_connect(
            sender_id,
            crate::state::PendingConnect {
                target: target.to_owned(),
                offer: offer.clone(),
                message_id,
            },
        );

        let forwarded = Message::new(
            sender_id.to_owned(),
            message_id,
            MessageBody::Connect { offer, criteria },
        );

        Dispatch {
            to_sender: Some(Message::ack(&self.relay_source_id, message_id)),
            to_targets: vec![(target.to_owned(), forwarded)],
        }
    }

    fn error(&self, response_to: u64, error: ProblemDetails) -> Message {
        if response_to == 0 {
            Message::unsolicited_error(&self.relay_source_id, error)
        } else {
            Message::error_response(&self.relay_source_id, response_to, error)
        }
    }

    pub fn capabilities_for(&self, source_id: &str) -> Capabilities {
        self.state.capabilities_for(source_id).unwrap_or_default()
    }

    /// Tears down every session involving `source_id` and returns a
    /// synthesized `close` (authored by the disconnected peer) for each
    /// surviving peer, paired with that peer's transport and capabilities
    /// so the caller can apply per-recipient security outside any lock.
    pub fn disconnect(&self, source_id: &str) -> Vec<(String, crate::state::OutboundTx, Capabilities, Message)> {
        self.state
            .disconnect(source_id)
            .into_iter()
            .map(|(peer_id, tx, caps)| {
                let message_id = self.ids.next_for(source_id);
                let close = Message::new(
                    source_id.to_owned(),
                    message_id,
                    MessageBody::Close {
                        target: peer_id.clone(),
                    },
                );
                (peer_id, tx, caps, close)
            })
            .collect()
    }

    /// Serializes `msg` and, if a crypto context is configured and
    /// `target_id`'s registered capabilities call for it, encrypts and/or
    /// signs it before serializing. Returns `None` (logging a warning)
    /// rather than panicking on a serialization or crypto failure -- an
    /// outbound frame that cannot be secured is dropped, not sent in the
    /// clear.
    pub fn secure_and_serialize(&self, target_id: &str, caps: &Capabilities, msg: &Message) -> Option<String> {
        let mut value = match serde_json::to_value(msg) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize outgoing message");
                return None;
            }
        };

        if let Some(ctx) = &self.crypto {
            let sec = caps.security.unwrap_or_default();
            if sec.encryption {
                if let Err(e) = ctx.encrypt(target_id, &mut value) {
                    warn!(%target_id, error = %e, "failed to encrypt outgoing message");
                    return None;
                }
            }
            if sec.integrity {
                if let Err(e) = ctx.sign(&mut value) {
                    warn!(%target_id, error = %e, "failed to sign outgoing message");
                    return None;
                }
            }
        }

        Some(value.to_string())
    }
}

fn extract_message_id(value: &serde_json::Value) -> u64 {
    value.get("message_id").and_then(serde_json::Value::as_u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RelayState;
    use serde_json::json;
    use swap_protocol::message::Capabilities;
    use tokio::sync::mpsc;

    fn core() -> RelayCore {
        RelayCore::new(Arc::new(RelayState::new()), None, "relay-0000000000".to_owned())
    }

    fn register(core: &RelayCore, id: &str, criteria_json: serde_json::Value) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        core.state.touch_transport(id, tx);
        let frame = json!({
            "version": 1,
            "source_id": id,
            "message_id": 1,
            "message_type": "register",
            "criteria": criteria_json,
        });
        let dispatch = core.handle_frame(id, &frame.to_string());
        assert!(dispatch.to_sender.is_some());
        rx
    }

    #[test]
    fn malformed_json_gets_unsolicited_error() {
        let core = core();
        let dispatch = core.handle_frame("endpoint-aaaaaaaa", "not json");
        let msg = dispatch.to_sender.expect("error expected");
        match msg.body {
            MessageBody::Response { response_to, error, .. } => {
                assert_eq!(response_to, 0);
                assert_eq!(
                    error.unwrap().kind,
                    swap_protocol::error_kinds::MESSAGE_MALFORMATTED
                );
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn register_then_ack() {
        let core = core();
        let (tx, _rx) = mpsc::unbounded_channel();
        core.state.touch_transport("endpoint-aaaaaaaa", tx);
        let frame = json!({
            "version": 1,
            "source_id": "endpoint-aaaaaaaa",
            "message_id": 1,
            "message_type": "register",
            "criteria": [{"type": "service", "value": "video-call"}],
        });
        let dispatch = core.handle_frame("endpoint-aaaaaaaa", &frame.to_string());
        let ack = dispatch.to_sender.expect("ack expected");
        match ack.body {
            MessageBody::Response { status, .. } => assert_eq!(status, 200),
            _ => panic!("expected response"),
        }
        assert_eq!(core.state.registered_endpoint_count(), 1);
    }

    #[test]
    fn connect_with_no_match_returns_target_unknown() {
        let core = core();
        let (tx, _rx) = mpsc::unbounded_channel();
        core.state.touch_transport("endpoint-aaaaaaaa", tx);
        let frame = json!({
            "version": 1,
            "source_id": "endpoint-aaaaaaaa",
            "message_id": 1,
            "message_type": "connect",
            "offer": "v=0...o",
            "criteria": [{"type": "service", "value": "video-call"}],
        });
        let dispatch = core.handle_frame("endpoint-aaaaaaaa", &frame.to_string());
        match dispatch.to_sender.unwrap().body {
            MessageBody::Response { error, .. } => {
                assert_eq!(error.unwrap().kind, swap_protocol::error_kinds::TARGET_UNKNOWN);
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn connect_forwards_to_matched_target_and_acks_sender() {
        let core = core();
        let _rx_b = register(&core, "endpoint-bbbbbbbb", json!([{"type": "service", "value": "video-call"}]));
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        core.state.touch_transport("endpoint-aaaaaaaa", tx_a);

        let frame = json!({
            "version": 1,
            "source_id": "endpoint-aaaaaaaa",
            "message_id": 2,
            "message_type": "connect",
            "offer": "v=0...o",
            "criteria": [{"type": "service", "value": "video-call"}],
        });
        let dispatch = core.handle_frame("endpoint-aaaaaaaa", &frame.to_string());
        assert!(dispatch.to_sender.is_some());
        assert_eq!(dispatch.to_targets.len(), 1);
        assert_eq!(dispatch.to_targets[0].0, "endpoint-bbbbbbbb");
        match &dispatch.to_targets[0].1.body {
            MessageBody::Connect { offer, .. } => assert_eq!(offer, "v=0...o"),
            _ => panic!("expected connect forwarded"),
        }
        assert_eq!(dispatch.to_targets[0].1.source_id, "endpoint-aaaaaaaa");
    }

    #[test]
    fn accept_creates_session_and_forwards() {
        let core = core();
        let _rx_a = register(&core, "endpoint-aaaaaaaa", json!([]));
        let _rx_b = register(&core, "endpoint-bbbbbbbb", json!([]));

        let frame = json!({
            "version": 1,
            "source_id": "endpoint-bbbbbbbb",
            "message_id": 3,
            "message_type": "accept",
            "target": "endpoint-aaaaaaaa",
            "answer": "v=0...a",
        });
        let dispatch = core.handle_frame("endpoint-bbbbbbbb", &frame.to_string());
        assert_eq!(dispatch.to_targets.len(), 1);
        assert!(core.state.has_session("endpoint-bbbbbbbb", "endpoint-aaaaaaaa"));
    }

    #[test]
    fn accept_clears_the_requestor_pending_connect() {
        let core = core();
        let _rx_a = register(&core, "endpoint-aaaaaaaa", json!([]));
        let _rx_b = register(&core, "endpoint-bbbbbbbb", json!([]));
        core.state.set_pending_connect(
            "endpoint-aaaaaaaa",
            crate::state::PendingConnect {
                target: "endpoint-bbbbbbbb".to_owned(),
                offer: "v=0...o".to_owned(),
                message_id: 2,
            },
        );

        let frame = json!({
            "version": 1,
            "source_id": "endpoint-bbbbbbbb",
            "message_id": 3,
            "message_type": "accept",
            "target": "endpoint-aaaaaaaa",
            "answer": "v=0...a",
        });
        core.handle_frame("endpoint-bbbbbbbb", &frame.to_string());
        assert!(core.state.take_pending_connect("endpoint-aaaaaaaa").is_none());
    }

    #[test]
    fn reject_clears_the_requestor_pending_connect() {
        let core = core();
        let _rx_a = register(&core, "endpoint-aaaaaaaa", json!([]));
        let _rx_b = register(&core, "endpoint-bbbbbbbb", json!([]));
        core.state.set_pending_connect(
            "endpoint-aaaaaaaa",
            crate::state::PendingConnect {
                target: "endpoint-bbbbbbbb".to_owned(),
                offer: "v=0...o".to_owned(),
                message_id: 2,
            },
        );

        let frame = json!({
            "version": 1,
            "source_id": "endpoint-bbbbbbbb",
            "message_id": 3,
            "message_type": "reject",
            "target": "endpoint-aaaaaaaa",
            "reason": "busy",
        });
        core.handle_frame("endpoint-bbbbbbbb", &frame.to_string());
        assert!(core.state.take_pending_connect("endpoint-aaaaaaaa").is_none());
    }

    #[test]
    fn close_removes_session() {
        let core = core();
        let _rx_a = register(&core, "endpoint-aaaaaaaa", json!([]));
        let _rx_b = register(&core, "endpoint-bbbbbbbb", json!([]));
        core.state.create_session("endpoint-aaaaaaaa", "endpoint-bbbbbbbb");

        let frame = json!({
            "version": 1,
            "source_id": "endpoint-aaaaaaaa",
            "message_id": 4,
            "message_type": "close",
            "target": "endpoint-bbbbbbbb",
        });
        core.handle_frame("endpoint-aaaaaaaa", &frame.to_string());
        assert!(!core.state.has_session("endpoint-aaaaaaaa", "endpoint-bbbbbbbb"));
    }

    #[test]
    fn disconnect_produces_synthesized_close_for_peer() {
        let core = core();
        let _rx_a = register(&core, "endpoint-aaaaaaaa", json!([]));
        let _rx_b = register(&core, "endpoint-bbbbbbbb", json!([]));
        core.state.create_session("endpoint-aaaaaaaa", "endpoint-bbbbbbbb");

        let closes = core.disconnect("endpoint-aaaaaaaa");
        assert_eq!(closes.len(), 1);
        let (peer, _tx, _caps, msg) = &closes[0];
        assert_eq!(peer, "endpoint-bbbbbbbb");
        assert_eq!(msg.source_id, "endpoint-aaaaaaaa");
        match &msg.body {
            MessageBody::Close { target } => assert_eq!(target, "endpoint-bbbbbbbb"),
            _ => panic!("expected close"),
        }
    }

    #[test]
    fn capabilities_for_unknown_endpoint_defaults() {
        let core = core();
        let caps = core.capabilities_for("unknown-source-id");
        assert_eq!(caps, Capabilities::default());
    }
}

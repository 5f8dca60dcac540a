//! The client-side connection actor: owns the WebSocket transport, gates
//! outbound sends through the state machine, correlates requests with
//! their responses, demultiplexes inbound frames into typed callbacks,
//! and reconnects with exponential backoff on unexpected close.

use crate::correlation::{PendingError, PendingTable, DEFAULT_RESPONSE_TIMEOUT};
use crate::events::{EventHandlers, SendRejected};
use crate::state_machine::{ClientEvent, ClientState};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swap_protocol::message::{Capabilities, Criterion, Message, MessageBody, ProblemDetails};
use swap_protocol::CryptoContext;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

pub const SWAP_SUBPROTOCOL: &str = "3gpp.SWAP.v1";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Clone)]
pub struct ClientConfig {
    pub url: String,
    pub source_id: String,
    pub capabilities: Capabilities,
    pub crypto: Option<Arc<CryptoContext>>,
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    pub handlers: EventHandlers,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_id: source_id.into(),
            capabilities: Capabilities::default(),
            crypto: None,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_reconnect_attempts: None,
            handlers: EventHandlers::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error(transparent)]
    Rejected(#[from] SendRejected),
    #[error(transparent)]
    Pending(#[from] PendingError),
}

struct Shared {
    config: ClientConfig,
    state: Mutex<ClientState>,
    pending: PendingTable,
    ids: AtomicU64,
    outbound: mpsc::UnboundedSender<String>,
    sessions: Mutex<HashSet<String>>,
}

fn apply(shared: &Shared, event: ClientEvent) {
    let mut state = shared.state.lock().expect("client state mutex poisoned");
    if let Some(next) = state.transition(event) {
        *state = next;
    }
}

fn secure_and_serialize(ctx: &CryptoContext, caps: &Capabilities, msg: &Message) -> Option<String> {
    let mut value = serde_json::to_value(msg).ok()?;
    let sec = caps.security.unwrap_or_default();
    if sec.encryption {
        ctx.encrypt(&msg.source_id, &mut value).ok()?;
    }
    if sec.integrity {
        ctx.sign(&mut value).ok()?;
    }
    Some(value.to_string())
}

/// Builds a `message_malformatted` error response addressed back to the
/// relay and enqueues it for send, securing it the same way any other
/// outbound frame would be. Used when an inbound frame fails to decrypt or
/// verify: the sender needs to hear about it, not just have it dropped.
fn send_malformatted(shared: &Shared, response_to: u64, detail: impl Into<String>) {
    let problem = ProblemDetails::message_malformatted(detail);
    let msg = if response_to == 0 {
        Message::unsolicited_error(shared.config.source_id.clone(), problem)
    } else {
        Message::error_response(shared.config.source_id.clone(), response_to, problem)
    };
    let text = match &shared.config.crypto {
        Some(ctx) => secure_and_serialize(ctx, &shared.config.capabilities, &msg),
        None => serde_json::to_string(&msg).ok(),
    };
    match text {
        Some(text) => {
            let _ = shared.outbound.send(text);
        }
        None => warn!("dropping malformatted-error response: serialization failed"),
    }
}

/// A handle to a running client connection. Cheap to clone; clones share
/// the same underlying transport actor.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    /// Connects to `config.url` and spawns the background actor that owns
    /// the transport for the life of the handle, reconnecting with backoff
    /// on unexpected close. Inbound events are delivered synchronously to
    /// `config.handlers` from the actor's task.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();

        let stream = connect_once(&config.url, config.connect_timeout).await?;

        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(ClientState::Idle),
            pending: PendingTable::new(),
            ids: AtomicU64::new(0),
            outbound: outbound_tx,
            sessions: Mutex::new(HashSet::new()),
        });

        tokio::spawn(run_connection(shared.clone(), stream, outbound_rx));

        Ok(Self { shared })
    }

    pub fn current_state(&self) -> ClientState {
        *self.shared.state.lock().expect("client state mutex poisoned")
    }

    /// The set of peers this client currently holds an open session with.
    pub fn active_sessions(&self) -> HashSet<String> {
        self.shared.sessions.lock().expect("session set poisoned").clone()
    }

    fn next_message_id(&self) -> u64 {
        self.shared.ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn guard_send(&self, kind: &'static str) -> Result<(), SendRejected> {
        let state = self.current_state();
        if state.may_send(kind) {
            Ok(())
        } else {
            Err(SendRejected { kind, state: state.label() })
        }
    }

    fn enqueue(&self, message: &Message) {
        let text = match &self.shared.config.crypto {
            Some(ctx) => secure_and_serialize(ctx, &self.shared.config.capabilities, message),
            None => serde_json::to_string(message).ok(),
        };
        match text {
            Some(text) => {
                let _ = self.shared.outbound.send(text);
            }
            None => warn!(message_id = message.message_id, "dropping outbound message: serialization failed"),
        }
    }

    pub fn register(&self, criteria: Vec<Criterion>) -> Result<(), ClientError> {
        self.guard_send("register")?;
        let message_id = self.next_message_id();
        let msg = Message::new(
            self.shared.config.source_id.clone(),
            message_id,
            MessageBody::Register { criteria, capabilities: Some(self.shared.config.capabilities.clone()) },
        );
        self.enqueue(&msg);
        Ok(())
    }

    /// Sends `connect` and awaits the relay's ack or error response,
    /// correlated on the request's own `message_id`.
    pub async fn connect_request(&self, offer: String, criteria: Vec<Criterion>) -> Result<Message, ClientError> {
        self.guard_send("connect")?;
        apply(&self.shared, ClientEvent::Connect);
        let message_id = self.next_message_id();
        let rx = self.shared.pending.register(message_id);
        let msg = Message::new(self.shared.config.source_id.clone(), message_id, MessageBody::Connect { offer, criteria });
        self.enqueue(&msg);
        self.shared
            .pending
            .await_response(message_id, rx, self.shared.config.response_timeout)
            .await
            .map_err(ClientError::from)
    }

    pub fn accept(&self, target: String, answer: String) -> Result<(), ClientError> {
        self.guard_send("accept")?;
        apply(&self.shared, ClientEvent::Accept);
        self.shared.sessions.lock().expect("session set poisoned").insert(target.clone());
        let message_id = self.next_message_id();
        let msg = Message::new(self.shared.config.source_id.clone(), message_id, MessageBody::Accept { target, answer });
        self.enqueue(&msg);
        Ok(())
    }

    pub fn reject(&self, target: String, reason: String) -> Result<(), ClientError> {
        self.guard_send("reject")?;
        apply(&self.shared, ClientEvent::Reject);
        let message_id = self.next_message_id();
        let msg = Message::new(self.shared.config.source_id.clone(), message_id, MessageBody::Reject { target, reason });
        self.enqueue(&msg);
        Ok(())
    }

    pub fn update(&self, target: String, sdp: String) -> Result<(), ClientError> {
        self.guard_send("update")?;
        apply(&self.shared, ClientEvent::Update);
        let message_id = self.next_message_id();
        let msg = Message::new(self.shared.config.source_id.clone(), message_id, MessageBody::Update { target, sdp });
        self.enqueue(&msg);
        Ok(())
    }

    pub fn close(&self, target: String) -> Result<(), ClientError> {
        self.guard_send("close")?;
        apply(&self.shared, ClientEvent::Close);
        self.shared.sessions.lock().expect("session set poisoned").remove(&target);
        let message_id = self.next_message_id();
        let msg = Message::new(self.shared.config.source_id.clone(), message_id, MessageBody::Close { target });
        self.enqueue(&msg);
        // No wire message completes teardown on the sending side, so the
        // return to idle happens locally right after it.
        apply(&self.shared, ClientEvent::Closed);
        Ok(())
    }

    pub fn application(&self, target: String, app_type: String, value: serde_json::Value) -> Result<(), ClientError> {
        self.guard_send("application")?;
        let message_id = self.next_message_id();
        let msg = Message::new(
            self.shared.config.source_id.clone(),
            message_id,
            MessageBody::Application { target, app_type, value },
        );
        self.enqueue(&msg);
        Ok(())
    }
}

async fn connect_once(url: &str, timeout: Duration) -> Result<WsStream, ClientError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::Connect(format!("invalid URL '{url}': {e}")))?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", SWAP_SUBPROTOCOL.parse().expect("subprotocol header value is valid"));

    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(ClientError::Connect(e.to_string())),
        Err(_) => Err(ClientError::Connect("connect attempt timed out".to_owned())),
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let capped = attempt.min(5); // 1s * 2^5 = 32s already exceeds the 30s cap
    let millis = INITIAL_BACKOFF.as_millis() as u64 * (1u64 << capped);
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

/// Owns the transport for the life of the handle: pumps outbound frames
/// from `outbound_rx` onto the socket, demultiplexes inbound frames into
/// `shared.config.handlers`, and reconnects with backoff on unexpected
/// close, flushing anything queued while disconnected in insertion order.
async fn run_connection(shared: Arc<Shared>, mut stream: WsStream, mut outbound_rx: mpsc::UnboundedReceiver<String>) {
    let mut queued: Vec<String> = Vec::new();

    loop {
        for text in queued.drain(..) {
            if stream.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }

        let should_reconnect = loop {
            tokio::select! {
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => handle_inbound(&shared, &text),
                        Some(Ok(WsMessage::Ping(data))) => { let _ = stream.send(WsMessage::Pong(data)).await; }
                        Some(Ok(WsMessage::Close(_))) | None => break true,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => { warn!(error = %e, "websocket error"); break true; }
                    }
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(text) => {
                            if stream.send(WsMessage::Text(text.into())).await.is_err() {
                                break true;
                            }
                        }
                        None => break false,
                    }
                }
            }
        };

        if !should_reconnect {
            shared.pending.cancel_all();
            return;
        }

        warn!("connection lost, cancelling pending requests and reconnecting");
        shared.pending.cancel_all();
        *shared.state.lock().expect("client state mutex poisoned") = ClientState::Idle;

        while let Ok(text) = outbound_rx.try_recv() {
            queued.push(text);
        }

        let mut attempt: u32 = 0;
        let reconnected = loop {
            if let Some(max) = shared.config.max_reconnect_attempts {
                if attempt >= max {
                    warn!(attempt, "giving up reconnecting");
                    break None;
                }
            }
            let backoff = backoff_for(attempt);
            attempt += 1;
            info!(attempt, ?backoff, "reconnecting");
            tokio::time::sleep(backoff).await;

            match connect_once(&shared.config.url, shared.config.connect_timeout).await {
                Ok(new_stream) => break Some(new_stream),
                Err(e) => warn!(error = %e, "reconnect attempt failed"),
            }
        };

        match reconnected {
            Some(new_stream) => stream = new_stream,
            None => return,
        }
    }
}

fn handle_inbound(shared: &Shared, text: &str) {
    let mut value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping unparsable inbound frame");
            return;
        }
    };

    if let Some(ctx) = &shared.config.crypto {
        let response_to = value.get("message_id").and_then(serde_json::Value::as_u64).unwrap_or(0);

        // Keyed on this client's own id: the relay encrypted with
        // `target_id` set to us, so we decrypt the same way.
        if let Err(e) = ctx.decrypt(&shared.config.source_id, &mut value) {
            warn!(error = %e, "failed to decrypt inbound frame");
            send_malformatted(shared, response_to, e.to_string());
            return;
        }
        let has_signature = value.get("security").and_then(|s| s.get("signature")).is_some();
        if has_signature {
            match ctx.verify(&value) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("inbound signature verification failed");
                    send_malformatted(shared, response_to, "signature verification failed");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "signature verification error");
                    send_malformatted(shared, response_to, e.to_string());
                    return;
                }
            }
        }
    }

    let msg: Message = match serde_json::from_value(value) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "dropping malformed inbound message");
            return;
        }
    };

    let source_id = msg.source_id.clone();
    let handlers = &shared.config.handlers;

    match msg.body {
        MessageBody::Response { response_to, status, reason, error } => {
            if response_to == 0 {
                if let (Some(cb), Some(problem)) = (&handlers.on_error, error) {
                    cb(problem);
                }
                return;
            }
            let completion = Message {
                version: msg.version,
                source_id,
                message_id: msg.message_id,
                body: MessageBody::Response { response_to, status, reason, error: error.clone() },
                security: None,
            };
            shared.pending.complete(response_to, status, error, completion);
        }
        MessageBody::Connect { offer, .. } => {
            apply(shared, ClientEvent::AcceptIncoming);
            if let Some(cb) = &handlers.on_connect {
                cb(offer, source_id);
            }
        }
        MessageBody::Accept { answer, .. } => {
            apply(shared, ClientEvent::Accept);
            shared.sessions.lock().expect("session set poisoned").insert(source_id.clone());
            if let Some(cb) = &handlers.on_accept {
                cb(answer, source_id);
            }
        }
        MessageBody::Reject { reason, .. } => {
            apply(shared, ClientEvent::Reject);
            if let Some(cb) = &handlers.on_reject {
                cb(reason, source_id);
            }
        }
        MessageBody::Update { sdp, .. } => {
            if let Some(cb) = &handlers.on_update {
                cb(sdp, source_id);
            }
        }
        MessageBody::Close { .. } => {
            apply(shared, ClientEvent::Close);
            shared.sessions.lock().expect("session set poisoned").remove(&source_id);
            if let Some(cb) = &handlers.on_close {
                cb(source_id);
            }
        }
        MessageBody::Application { app_type, value, .. } => {
            if let Some(cb) = &handlers.on_application {
                cb(app_type, value, source_id);
            }
        }
        MessageBody::Register { .. } => {
            warn!("unexpected register message received by client; ignoring");
        }
    }
}

//! Axum WebSocket upgrade handler: negotiates the `3gpp.SWAP.v1`
//! subprotocol and wires each connection's read/write halves through the
//! relay core. One task per connection; inbound frames are handled inline
//! and outbound forwards from other connections arrive over an mpsc
//! channel, a single select loop per socket.

use crate::relay::{Dispatch, RelayCore};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const SWAP_SUBPROTOCOL: &str = "3gpp.SWAP.v1";

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(core): State<Arc<RelayCore>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !offers_subprotocol(&headers, SWAP_SUBPROTOCOL) {
        return (
            StatusCode::BAD_REQUEST,
            format!("missing required Sec-WebSocket-Protocol: {SWAP_SUBPROTOCOL}"),
        )
            .into_response();
    }

    ws.protocols([SWAP_SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, core))
        .into_response()
}

fn offers_subprotocol(headers: &HeaderMap, protocol: &str) -> bool {
    headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|p| p.trim() == protocol))
}

fn extract_source_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("source_id")?.as_str().map(ToOwned::to_owned)
}

async fn handle_socket(mut socket: WebSocket, core: Arc<RelayCore>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut bound_source_id: Option<String> = None;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let Some(source_id) = extract_source_id(&text) else {
                            warn!("dropping frame with no identifiable source_id");
                            continue;
                        };
                        if bound_source_id.as_deref() != Some(source_id.as_str()) {
                            core.state.touch_transport(&source_id, tx.clone());
                            bound_source_id = Some(source_id.clone());
                        }
                        let dispatch = core.handle_frame(&source_id, &text);
                        deliver(&core, &mut socket, &source_id, dispatch).await;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if socket.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket error");
                        break;
                    }
                }
            }
            Some(text) = rx.recv() => {
                if socket.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(source_id) = bound_source_id {
        let closes = core.disconnect(&source_id);
        for (peer_id, peer_tx, caps, msg) in closes {
            if let Some(text) = core.secure_and_serialize(&peer_id, &caps, &msg) {
                let _ = peer_tx.send(text);
            }
        }
        info!(%source_id, "connection closed");
    }
}

async fn deliver(core: &RelayCore, socket: &mut WebSocket, sender_id: &str, dispatch: Dispatch) {
    if let Some(to_sender) = dispatch.to_sender {
        let caps = core.capabilities_for(sender_id);
        if let Some(text) = core.secure_and_serialize(sender_id, &caps, &to_sender) {
            if socket.send(WsMessage::Text(text.into())).await.is_err() {
                return;
            }
        }
    }
    for (target_id, msg) in dispatch.to_targets {
        let Some(tx) = core.state.outbound_for(&target_id) else {
            continue;
        };
        let caps = core.capabilities_for(&target_id);
        if let Some(text) = core.secure_and_serialize(&target_id, &caps, &msg) {
            let _ = tx.send(text);
        }
    }
}

//! End-to-end: with a shared secret configured, a `connect` sent through
//! the real client runtime arrives at its peer wrapped in a populated
//! security envelope, and unpacks back to the original offer.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use swap_protocol::message::{Capabilities, SecurityCapabilities};
use swap_protocol::CryptoContext;
use swap_test_support::{RawWsClient, TestRelay};
use swap_client::{ClientConfig, ClientHandle};

const SHARED_SECRET: &str = "s";

fn secured_capabilities() -> Capabilities {
    Capabilities {
        security: Some(SecurityCapabilities { integrity: true, encryption: true }),
    }
}

#[tokio::test]
async fn connect_through_the_client_runtime_is_secured_end_to_end() {
    let relay = TestRelay::start_secured(SHARED_SECRET).await;
    let b_id = "endpoint-bbbbbbbb";

    // B stays a raw peer so the test can inspect the literal bytes on the
    // wire before any unpacking happens.
    let mut b = RawWsClient::connect(&relay.ws_url).await.expect("B connects");
    b.send_json(&json!({
        "version": 1,
        "source_id": b_id,
        "message_id": 1,
        "message_type": "register",
        "criteria": [{"type": "service", "value": "video-call"}],
        "capabilities": {"security": {"integrity": true, "encryption": true}},
    }))
    .await
    .expect("B registers");
    assert_eq!(b.recv_json().await.unwrap()["status"], 200);

    let mut config = ClientConfig::new(relay.ws_url.clone(), "endpoint-aaaaaaaa");
    config.capabilities = secured_capabilities();
    config.crypto = Some(Arc::new(CryptoContext::new(SHARED_SECRET)));
    let a = ClientHandle::connect(config).await.expect("A connects through the client runtime");

    let connect_result = a
        .connect_request("v=0..o".to_owned(), vec![swap_protocol::Criterion::new("service", json!("video-call"))])
        .await;
    assert!(connect_result.is_ok(), "connect should be acked: {connect_result:?}");

    let raw_frame = b.recv_json().await.expect("B receives the secured frame");
    let security = raw_frame.get("security").expect("security block present");
    assert_eq!(security["enc"], "AES-GCM");
    assert_eq!(security["mac"], "HMAC-SHA256");
    assert!(security["ciphertext"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(security["iv"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(security["signature"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(raw_frame.get("offer").is_none(), "plaintext fields must be absent once encrypted");

    // Unpack with the same context B would use and confirm the payload
    // round-trips.
    let ctx = CryptoContext::new(SHARED_SECRET);
    let mut unpacked = raw_frame.clone();
    ctx.decrypt(b_id, &mut unpacked).expect("decrypt succeeds");
    assert_eq!(unpacked["offer"], "v=0..o");

    tokio::time::sleep(Duration::from_millis(10)).await;
}

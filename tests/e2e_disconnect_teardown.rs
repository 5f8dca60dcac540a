//! End-to-end: closing a transport mid-session synthesizes a `close` for
//! the surviving peer and tears the session out of every registry.

use serde_json::json;
use swap_test_support::{RawWsClient, TestRelay};

#[tokio::test]
async fn disconnecting_a_transport_closes_the_peer_and_frees_the_session() {
    let relay = TestRelay::start().await;
    let a_id = "endpoint-aaaaaaaa";
    let b_id = "endpoint-bbbbbbbb";

    let mut a = RawWsClient::connect(&relay.ws_url).await.expect("A connects");
    a.send_json(&json!({
        "version": 1, "source_id": a_id, "message_id": 1,
        "message_type": "register", "criteria": [],
    }))
    .await
    .unwrap();
    assert_eq!(a.recv_json().await.unwrap()["status"], 200);

    let mut b = RawWsClient::connect(&relay.ws_url).await.expect("B connects");
    b.send_json(&json!({
        "version": 1, "source_id": b_id, "message_id": 1,
        "message_type": "register", "criteria": [],
    }))
    .await
    .unwrap();
    assert_eq!(b.recv_json().await.unwrap()["status"], 200);

    b.send_json(&json!({
        "version": 1, "source_id": b_id, "message_id": 2,
        "message_type": "connect", "offer": "v=0..o", "criteria": [],
    }))
    .await
    .unwrap();
    let forwarded = a.recv_json().await.expect("A receives the connect");
    assert_eq!(forwarded["message_type"], "connect");
    assert_eq!(b.recv_json().await.unwrap()["status"], 200);

    a.send_json(&json!({
        "version": 1, "source_id": a_id, "message_id": 2,
        "message_type": "accept", "target": b_id, "answer": "v=0..a",
    }))
    .await
    .unwrap();
    assert_eq!(b.recv_json().await.unwrap()["message_type"], "accept");
    assert_eq!(a.recv_json().await.unwrap()["status"], 200);

    let before: serde_json::Value = reqwest::get(&relay.health_url).await.unwrap().json().await.unwrap();
    assert_eq!(before["activeSessions"], 1);
    assert_eq!(before["registeredEndpoints"], 2);

    a.close().await.expect("A closes its transport");

    let close_msg = b.recv_json().await.expect("B receives a synthesized close");
    assert_eq!(close_msg["message_type"], "close");
    assert_eq!(close_msg["source_id"], a_id);

    // Give the relay's dispatch unit a moment to finish tearing down state
    // after the socket close is observed.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let after: serde_json::Value = reqwest::get(&relay.health_url).await.unwrap().json().await.unwrap();
    assert_eq!(after["activeSessions"], 0);
    assert_eq!(after["registeredEndpoints"], 1, "A's registration must be gone after disconnect");
}

//! End-to-end: `connect` against criteria nothing has registered for
//! yields a `target_unknown` error.

use serde_json::json;
use swap_test_support::{RawWsClient, TestRelay};

#[tokio::test]
async fn connect_with_no_matching_registration_is_target_unknown() {
    let relay = TestRelay::start().await;
    let mut a = RawWsClient::connect(&relay.ws_url).await.expect("A connects");

    a.send_json(&json!({
        "version": 1,
        "source_id": "endpoint-aaaaaaaa",
        "message_id": 1,
        "message_type": "connect",
        "offer": "v=0..o",
        "criteria": [{"type": "service", "value": "ghost"}],
    }))
    .await
    .expect("A sends connect");

    // The exact numeric status for non-routing errors isn't pinned down
    // across relay implementations; assert the error category instead.
    let response = a.recv_json().await.expect("A receives a response");
    let status = response["status"].as_i64().expect("status present");
    assert!(!(200..300).contains(&status), "expected a failure status, got {status}");
    let error_type = response["error"]["type"].as_str().expect("error.type present");
    assert!(error_type.ends_with("target_unknown"), "got {error_type}");
}

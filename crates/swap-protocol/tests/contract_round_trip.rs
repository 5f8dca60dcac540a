//! Contract tests: every message kind built through the factory must
//! serialize, re-parse, and pass shape validation.

use serde_json::json;
use swap_protocol::{build_message, validate_shape, Capabilities, Criterion, Message, MessageBody, SecurityCapabilities};

fn assert_round_trips(msg: &Message) {
    let value = serde_json::to_value(msg).expect("message serializes to JSON");
    let result = validate_shape(&value);
    assert!(
        result.valid,
        "expected valid shape for {}: {:?}",
        msg.kind_name(),
        result.errors
    );

    let rebuilt = build_message(&value).expect("factory should rebuild from its own JSON");
    assert_eq!(&rebuilt, msg);
}

#[test]
fn register_round_trips() {
    let msg = Message::new(
        "endpoint-aaaaaaaa",
        1,
        MessageBody::Register {
            criteria: vec![Criterion::new("service", json!("video-call"))],
            capabilities: Some(Capabilities {
                security: Some(SecurityCapabilities {
                    integrity: true,
                    encryption: true,
                }),
            }),
        },
    );
    assert_round_trips(&msg);
}

#[test]
fn response_round_trips() {
    let msg = Message::ack("relay-0000000000", 5);
    assert_round_trips(&msg);
}

#[test]
fn connect_round_trips() {
    let msg = Message::new(
        "endpoint-aaaaaaaa",
        2,
        MessageBody::Connect {
            offer: "v=0...o".to_owned(),
            criteria: vec![Criterion::new("service", json!("video-call"))],
        },
    );
    assert_round_trips(&msg);
}

#[test]
fn accept_round_trips() {
    let msg = Message::new(
        "endpoint-bbbbbbbb",
        3,
        MessageBody::Accept {
            target: "endpoint-aaaaaaaa".to_owned(),
            answer: "v=0...a".to_owned(),
        },
    );
    assert_round_trips(&msg);
}

#[test]
fn reject_round_trips() {
    let msg = Message::new(
        "endpoint-bbbbbbbb",
        4,
        MessageBody::Reject {
            target: "endpoint-aaaaaaaa".to_owned(),
            reason: "busy".to_owned(),
        },
    );
    assert_round_trips(&msg);
}

#[test]
fn update_round_trips() {
    let msg = Message::new(
        "endpoint-aaaaaaaa",
        5,
        MessageBody::Update {
            target: "endpoint-bbbbbbbb".to_owned(),
            sdp: "v=0...".to_owned(),
        },
    );
    assert_round_trips(&msg);
}

#[test]
fn close_round_trips() {
    let msg = Message::new(
        "endpoint-aaaaaaaa",
        6,
        MessageBody::Close {
            target: "endpoint-bbbbbbbb".to_owned(),
        },
    );
    assert_round_trips(&msg);
}

#[test]
fn application_round_trips() {
    let msg = Message::new(
        "endpoint-aaaaaaaa",
        7,
        MessageBody::Application {
            target: "endpoint-bbbbbbbb".to_owned(),
            app_type: "custom.ping".to_owned(),
            value: json!({"nonce": 42}),
        },
    );
    assert_round_trips(&msg);
}

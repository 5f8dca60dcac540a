//! The eight SWAP v1 message kinds and their shared envelope.
//!
//! All wire messages are one flat JSON object: the envelope fields
//! (`version`, `source_id`, `message_id`, `message_type`, optional
//! `security`) sit alongside the kind-specific payload fields at the same
//! level. `message_type` is both the serde tag and a field name, so the
//! payload is modeled as a `#[serde(flatten)]`ed, internally tagged enum.

use crate::envelope::SecurityEnvelope;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;

/// A `{type, value}` capability selector. The matcher treats `value`
/// opaquely: only equality of `(type, canonical_json(value))` matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
}

impl Criterion {
    pub fn new(kind: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            value,
        }
    }

    /// Identity key used by the matching engine: `(type, canonical JSON of value)`.
    pub fn identity_key(&self) -> (String, String) {
        (self.kind.clone(), crate::canonical::to_canonical_string(&self.value))
    }
}

/// `capabilities.security.{integrity,encryption}` advertised in `register`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityCapabilities {
    #[serde(default)]
    pub integrity: bool,
    #[serde(default)]
    pub encryption: bool,
}

impl SecurityCapabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn any(&self) -> bool {
        self.integrity || self.encryption
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityCapabilities>,
}

/// Problem Details error object (RFC 7807-shaped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

/// Frozen v1 error kinds, named as `type` URL-form identifiers.
pub mod error_kinds {
    pub const MESSAGE_UNKNOWN: &str = "https://3gpp.org/swap/v1/errors/message_unknown";
    pub const MESSAGE_MALFORMATTED: &str = "https://3gpp.org/swap/v1/errors/message_malformatted";
    pub const TARGET_UNKNOWN: &str = "https://3gpp.org/swap/v1/errors/target_unknown";
    pub const UNAUTHORIZED: &str = "https://3gpp.org/swap/v1/errors/unauthorized";
}

impl ProblemDetails {
    pub fn new(kind: &str, title: &str, status: u16, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.to_owned(),
            title: title.to_owned(),
            status,
            detail: detail.into(),
        }
    }

    pub fn message_unknown(detail: impl Into<String>) -> Self {
        Self::new(
            error_kinds::MESSAGE_UNKNOWN,
            "Unknown message type",
            400,
            detail,
        )
    }

    pub fn message_malformatted(detail: impl Into<String>) -> Self {
        Self::new(
            error_kinds::MESSAGE_MALFORMATTED,
            "Malformed message",
            400,
            detail,
        )
    }

    pub fn target_unknown(detail: impl Into<String>) -> Self {
        Self::new(error_kinds::TARGET_UNKNOWN, "Target unknown", 404, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(error_kinds::UNAUTHORIZED, "Unauthorized", 401, detail)
    }
}

/// The eight SWAP v1 message kinds, tagged on the wire by `message_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum MessageBody {
    Register {
        criteria: Vec<Criterion>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capabilities: Option<Capabilities>,
    },
    Response {
        response_to: u64,
        status: i32,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ProblemDetails>,
    },
    Connect {
        offer: String,
        criteria: Vec<Criterion>,
    },
    Accept {
        target: String,
        answer: String,
    },
    Reject {
        target: String,
        reason: String,
    },
    Update {
        target: String,
        sdp: String,
    },
    Close {
        target: String,
    },
    Application {
        target: String,
        #[serde(rename = "type")]
        app_type: String,
        value: serde_json::Value,
    },
}

impl MessageBody {
    pub fn kind_name(&self) -> &'static str {
        match self {
            MessageBody::Register { .. } => "register",
            MessageBody::Response { .. } => "response",
            MessageBody::Connect { .. } => "connect",
            MessageBody::Accept { .. } => "accept",
            MessageBody::Reject { .. } => "reject",
            MessageBody::Update { .. } => "update",
            MessageBody::Close { .. } => "close",
            MessageBody::Application { .. } => "application",
        }
    }

    /// The `target` source_id this message is addressed to, if any.
    /// `register`, `connect`, and `response` have no target.
    pub fn target(&self) -> Option<&str> {
        match self {
            MessageBody::Accept { target, .. }
            | MessageBody::Reject { target, .. }
            | MessageBody::Update { target, .. }
            | MessageBody::Close { target }
            | MessageBody::Application { target, .. } => Some(target.as_str()),
            MessageBody::Register { .. }
            | MessageBody::Response { .. }
            | MessageBody::Connect { .. } => None,
        }
    }
}

impl fmt::Display for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind_name())
    }
}

/// A full SWAP v1 wire message: the shared envelope plus kind-specific
/// payload, flattened into one JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub version: u32,
    pub source_id: String,
    pub message_id: u64,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityEnvelope>,
}

impl Message {
    pub fn new(source_id: impl Into<String>, message_id: u64, body: MessageBody) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            source_id: source_id.into(),
            message_id,
            body,
            security: None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.body.kind_name()
    }

    /// An error `response` with `response_to = 0`, used when framing or
    /// envelope failures occur before any request was identified.
    pub fn unsolicited_error(source_id: impl Into<String>, error: ProblemDetails) -> Self {
        Self::new(
            source_id,
            0,
            MessageBody::Response {
                response_to: 0,
                status: i32::from(error.status),
                reason: error.title.clone(),
                error: Some(error),
            },
        )
    }

    /// An error `response` correlated to the message that failed.
    pub fn error_response(
        source_id: impl Into<String>,
        response_to: u64,
        error: ProblemDetails,
    ) -> Self {
        Self::new(
            source_id,
            response_to,
            MessageBody::Response {
                response_to,
                status: i32::from(error.status),
                reason: error.title.clone(),
                error: Some(error),
            },
        )
    }

    /// A plain `200 OK` acknowledgement response.
    pub fn ack(source_id: impl Into<String>, response_to: u64) -> Self {
        Self::new(
            source_id,
            response_to,
            MessageBody::Response {
                response_to,
                status: 200,
                reason: "OK".to_owned(),
                error: None,
            },
        )
    }
}

//! swap-protocol: wire types, schema validation, and the hop-by-hop
//! security envelope for SWAP v1 (3GPP TS 26.113) signaling.
//!
//! All message kinds use `message_type` as a discriminated-union tag on a
//! single flat JSON object (see [`message::Message`]).

pub mod canonical;
pub mod envelope;
pub mod factory;
pub mod ids;
pub mod message;
pub mod schema;

pub use envelope::{CryptoContext, CryptoError, SecurityEnvelope};
pub use factory::build_message;
pub use ids::{generate_source_id, MessageIdCounter, MessageIdRegistry, MIN_SOURCE_ID_LEN};
pub use message::{
    error_kinds, Capabilities, Criterion, Message, MessageBody, ProblemDetails,
    SecurityCapabilities, PROTOCOL_VERSION,
};
pub use schema::{validate_shape, ValidationResult};

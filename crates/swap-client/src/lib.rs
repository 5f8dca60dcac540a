//! The SWAP v1 client runtime: a transport actor around a single signaling
//! connection, gated by the client-side session state machine, with
//! request/response correlation, inbound event demultiplexing, and
//! reconnect-with-backoff.

pub mod connection;
pub mod correlation;
pub mod events;
pub mod sdp;
pub mod state_machine;

pub use connection::{ClientConfig, ClientError, ClientHandle, SWAP_SUBPROTOCOL};
pub use events::{EventHandlers, SendRejected};
pub use state_machine::{ClientEvent, ClientState};

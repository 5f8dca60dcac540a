//! Shared test utilities for the SWAP v1 relay and client suite: a real
//! relay bound to an ephemeral port, and an untyped WebSocket peer for
//! driving it adversarially.

pub mod raw_client;
pub mod test_relay;

pub use raw_client::RawWsClient;
pub use test_relay::TestRelay;

//! The SWAP v1 relay: a hub that registers endpoints by criteria, matches
//! `connect` requests against them, and forwards signaling messages
//! between the resulting pair for the life of their session.

pub mod config;
pub mod http;
pub mod matching;
pub mod relay;
pub mod session;
pub mod state;
pub mod ws;

pub use config::Config;
pub use relay::RelayCore;
pub use state::RelayState;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the relay's axum router: the SWAP v1 WebSocket endpoint and a
/// health probe.
pub fn build_router(core: Arc<RelayCore>) -> Router {
    Router::new()
        .route("/3gpp-swap/v1", get(ws::upgrade))
        .route("/health", get(http::health))
        .with_state(core)
        .layer(TraceLayer::new_for_http())
}

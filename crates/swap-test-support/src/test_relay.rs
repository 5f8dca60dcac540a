//! Spins up a real [`swap_relay`] instance bound to an ephemeral localhost
//! port, for integration tests that drive it over a live WebSocket.

use std::sync::Arc;
use swap_protocol::{generate_source_id, CryptoContext};
use swap_relay::{build_router, RelayCore, RelayState};

pub struct TestRelay {
    pub ws_url: String,
    pub health_url: String,
}

impl TestRelay {
    /// Starts a relay with security disabled.
    pub async fn start() -> Self {
        Self::start_with_crypto(None).await
    }

    /// Starts a relay with the hop-by-hop security envelope enabled using
    /// `shared_secret`.
    pub async fn start_secured(shared_secret: &str) -> Self {
        Self::start_with_crypto(Some(Arc::new(CryptoContext::new(shared_secret)))).await
    }

    async fn start_with_crypto(crypto: Option<Arc<CryptoContext>>) -> Self {
        let state = Arc::new(RelayState::new());
        let core = Arc::new(RelayCore::new(state, crypto, generate_source_id("relay")));
        let router = build_router(core);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().expect("listener has a local address");

        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("test relay server error");
        });

        Self {
            ws_url: format!("ws://{addr}/3gpp-swap/v1"),
            health_url: format!("http://{addr}/health"),
        }
    }
}

//! `GET /health`: a liveness/readiness snapshot of the relay's in-memory
//! state, for load balancer or orchestrator probes.

use crate::relay::RelayCore;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    registered_endpoints: usize,
    active_sessions: usize,
}

pub async fn health(State(core): State<Arc<RelayCore>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        registered_endpoints: core.state.registered_endpoint_count(),
        active_sessions: core.state.active_session_count(),
    })
}

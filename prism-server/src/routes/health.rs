//! Health and status endpoints

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::state::AppState;
use crate::types::{HealthResponse, StatusResponse};

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
}

/// Health check endpoint
/// GET /health
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        proof_mode: state.engine().mode(),
    };

    (StatusCode::OK, Json(response))
}

/// Detailed status endpoint
/// GET /status
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine();

    let response = StatusResponse {
        status: "running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        proof_mode: engine.mode(),
        mock_mode: engine.is_mock_mode(),
        degraded_proofs: engine.degraded_proofs(),
        circuit: engine.circuit_info().clone(),
        program_id: state.lifecycle().deriver().program_id(),
        wallet: state.wallet(),
        total_proofs: state.total_proofs_generated(),
        uptime_secs: state.uptime_secs(),
    };

    (StatusCode::OK, Json(response))
}

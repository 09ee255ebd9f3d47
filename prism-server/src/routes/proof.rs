//! Proof generation and verification endpoints

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::error::ProofError;
use crate::routes::ApiError;
use crate::services::prover::validate_amounts;
use crate::state::AppState;
use crate::types::{
    CircuitInfo, GenerateProofRequest, GenerateProofResponse, ProofMode, VerifyProofRequest,
    VerifyProofResponse,
};

/// Create proof routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/proof/generate", post(generate_proof))
        .route("/proof/verify", post(verify_proof))
        .route("/proof/circuit", get(circuit_info))
}

/// Generate a solvency proof
/// POST /api/v1/proof/generate
#[instrument(skip(state, request))]
async fn generate_proof(
    State(state): State<AppState>,
    Json(request): Json<GenerateProofRequest>,
) -> Result<Json<GenerateProofResponse>, ApiError> {
    info!(threshold = request.threshold, "Received proof generation request");

    let (actual_balance, threshold) =
        validate_amounts(request.actual_balance, request.threshold).map_err(ProofError::from)?;

    let start = std::time::Instant::now();
    let generated = state.engine().generate_proof(actual_balance, threshold).await?;
    let generation_time_ms = start.elapsed().as_millis() as u64;

    state.increment_proofs();
    if generated.mode == ProofMode::Simulated {
        warn!(threshold, "Returning a SIMULATED solvency proof");
    }

    let response = GenerateProofResponse {
        request_id: uuid::Uuid::new_v4().to_string(),
        proof: generated.proof,
        mode: generated.mode,
        generation_time_ms,
    };

    info!(
        request_id = %response.request_id,
        mode = response.mode.as_str(),
        generation_time_ms,
        "Proof generated successfully"
    );

    Ok(Json(response))
}

/// Verify a solvency proof
/// POST /api/v1/proof/verify
#[instrument(skip(state, request))]
async fn verify_proof(
    State(state): State<AppState>,
    Json(request): Json<VerifyProofRequest>,
) -> Json<VerifyProofResponse> {
    let valid = state.engine().verify_proof(&request.proof).await;
    let mode = state.engine().mode().unwrap_or(ProofMode::Simulated);

    info!(valid, mode = mode.as_str(), "Proof verification finished");
    Json(VerifyProofResponse { valid, mode })
}

/// GET /api/v1/proof/circuit
async fn circuit_info(State(state): State<AppState>) -> Json<CircuitInfo> {
    Json(state.engine().circuit_info().clone())
}

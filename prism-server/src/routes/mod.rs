//! HTTP Routes for the identity server
//!
//! REST endpoints for identity management and solvency proofs.

pub mod health;
pub mod identity;
pub mod proof;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tracing::{error, warn};

use crate::error::{LifecycleError, NetworkError, PrismError, ProofError};
use crate::state::AppState;
use crate::types::{ErrorCode, ErrorResponse};

/// Create all routes
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .nest("/api/v1", identity::routes().merge(proof::routes()))
        .with_state(state)
}

/// Error returned from handlers, rendered as an [`ErrorResponse`]
#[derive(Debug)]
pub struct ApiError(pub PrismError);

impl<E: Into<PrismError>> From<E> for ApiError {
    fn from(error: E) -> Self {
        Self(error.into())
    }
}

impl ApiError {
    fn classify(&self) -> (StatusCode, ErrorCode) {
        match &self.0 {
            PrismError::Validation(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidInput),
            PrismError::Lifecycle(e) => match e {
                LifecycleError::AlreadyExists => (StatusCode::CONFLICT, ErrorCode::AlreadyExists),
                LifecycleError::NotFound => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
                LifecycleError::AlreadyRevoked => (StatusCode::CONFLICT, ErrorCode::AlreadyRevoked),
                LifecycleError::IndexConflict { .. } => {
                    (StatusCode::CONFLICT, ErrorCode::IndexConflict)
                }
                LifecycleError::ContextRevoked => (StatusCode::CONFLICT, ErrorCode::ContextRevoked),
                LifecycleError::ExceedsTransactionLimit => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorCode::ExceedsTransactionLimit,
                ),
                LifecycleError::SpendingOverflow => {
                    (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::SpendingOverflow)
                }
                LifecycleError::MutationInFlight => {
                    (StatusCode::CONFLICT, ErrorCode::MutationInFlight)
                }
            },
            PrismError::Network(e) => match e {
                NetworkError::WalletNotReady(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::WalletNotReady)
                }
                NetworkError::InsufficientFunds => {
                    (StatusCode::PAYMENT_REQUIRED, ErrorCode::InsufficientFunds)
                }
                NetworkError::ProgramRejected { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::ProgramRejected)
                }
                NetworkError::ConfirmationTimeout { .. } => {
                    (StatusCode::GATEWAY_TIMEOUT, ErrorCode::ConfirmationTimeout)
                }
                NetworkError::MalformedAccount(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError)
                }
                NetworkError::Rpc(_) => (StatusCode::BAD_GATEWAY, ErrorCode::InternalError),
            },
            PrismError::Proof(e) => match e {
                ProofError::ProofWouldFail { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::ProofWouldFail)
                }
                ProofError::Validation(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidInput),
                ProofError::Backend(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::ProofGenerationFailed,
                ),
                ProofError::Serialization(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError)
                }
            },
            PrismError::Derivation(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        if status.is_server_error() {
            error!(code = ?code, error = %self.0, "Request failed");
        } else {
            warn!(code = ?code, error = %self.0, "Request rejected");
        }

        let details = match &self.0 {
            PrismError::Network(NetworkError::ProgramRejected {
                reason: Some(reason),
                ..
            }) => Some(json!({ "programError": reason.as_str() })),
            PrismError::Network(NetworkError::ConfirmationTimeout { signature, attempts }) => {
                Some(json!({ "signature": signature.to_string(), "attempts": attempts }))
            }
            PrismError::Lifecycle(LifecycleError::IndexConflict { expected }) => {
                Some(json!({ "expectedIndex": expected }))
            }
            _ => None,
        };

        let body = ErrorResponse {
            code,
            message: self.0.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

//! Root and context identity endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument};

use crate::error::{LifecycleError, NetworkError};
use crate::routes::ApiError;
use crate::state::AppState;
use crate::types::{
    Address, ContextIdentity, ContextResponse, CreateContextRequest, CreateRootRequest,
    RootIdentity, RootResponse, SpendRequest, UpdatePrivacyRequest,
};

/// Create identity routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/identity/root", post(create_root))
        .route("/identity/:owner", get(get_root))
        .route("/identity/:owner/privacy", put(update_privacy))
        .route("/identity/:owner/contexts", post(create_context))
        .route("/identity/:owner/contexts/:index", get(get_context))
        .route("/identity/:owner/contexts/:index/revoke", post(revoke_context))
        .route("/identity/:owner/contexts/:index/check", post(check_spending))
        .route("/identity/:owner/contexts/:index/spend", post(record_spending))
}

fn parse_owner(owner: &str) -> Result<Address, ApiError> {
    Ok(owner.parse::<Address>()?)
}

fn root_response(state: &AppState, root: RootIdentity) -> Result<Json<RootResponse>, ApiError> {
    let (address, _) = state.lifecycle().root_address(&root.owner)?;
    Ok(Json(RootResponse { address, root }))
}

fn context_response(
    state: &AppState,
    owner: &Address,
    context: ContextIdentity,
) -> Result<Json<ContextResponse>, ApiError> {
    let (address, _) = state
        .lifecycle()
        .context_address(owner, context.context_index)?;
    Ok(Json(ContextResponse { address, context }))
}

/// Ensure the server wallet's root identity exists
/// POST /api/v1/identity/root
#[instrument(skip(state, request))]
async fn create_root(
    State(state): State<AppState>,
    Json(request): Json<CreateRootRequest>,
) -> Result<(StatusCode, Json<RootResponse>), ApiError> {
    let owner = state
        .wallet()
        .ok_or_else(|| NetworkError::WalletNotReady("no server wallet configured".into()))?;

    let root = state
        .lifecycle()
        .ensure_root(&owner, request.privacy_level)
        .await?;
    info!(%owner, "Root identity ready");

    Ok((StatusCode::OK, root_response(&state, root)?))
}

/// GET /api/v1/identity/:owner
async fn get_root(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<Json<RootResponse>, ApiError> {
    let owner = parse_owner(&owner)?;
    let root = state
        .lifecycle()
        .fetch_root(&owner)
        .await?
        .ok_or(LifecycleError::NotFound)?;

    root_response(&state, root)
}

/// PUT /api/v1/identity/:owner/privacy
#[instrument(skip(state, request))]
async fn update_privacy(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Json(request): Json<UpdatePrivacyRequest>,
) -> Result<Json<RootResponse>, ApiError> {
    let owner = parse_owner(&owner)?;
    let root = state
        .lifecycle()
        .update_privacy_level(&owner, request.privacy_level)
        .await?;

    root_response(&state, root)
}

/// POST /api/v1/identity/:owner/contexts
#[instrument(skip(state, request))]
async fn create_context(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Json(request): Json<CreateContextRequest>,
) -> Result<(StatusCode, Json<ContextResponse>), ApiError> {
    let owner = parse_owner(&owner)?;
    let context = state
        .lifecycle()
        .create_context(&owner, request.context_type, request.max_per_transaction)
        .await?;

    Ok((StatusCode::CREATED, context_response(&state, &owner, context)?))
}

/// GET /api/v1/identity/:owner/contexts/:index
async fn get_context(
    State(state): State<AppState>,
    Path((owner, index)): Path<(String, u16)>,
) -> Result<Json<ContextResponse>, ApiError> {
    let owner = parse_owner(&owner)?;
    let context = state
        .lifecycle()
        .fetch_context(&owner, index)
        .await?
        .ok_or(LifecycleError::NotFound)?;

    context_response(&state, &owner, context)
}

/// POST /api/v1/identity/:owner/contexts/:index/revoke
#[instrument(skip(state))]
async fn revoke_context(
    State(state): State<AppState>,
    Path((owner, index)): Path<(String, u16)>,
) -> Result<Json<ContextResponse>, ApiError> {
    let owner = parse_owner(&owner)?;
    let context = state.lifecycle().revoke_context(&owner, index).await?;

    context_response(&state, &owner, context)
}

/// Read-only limit check; answers `{"allowed": true}` or an error
/// POST /api/v1/identity/:owner/contexts/:index/check
async fn check_spending(
    State(state): State<AppState>,
    Path((owner, index)): Path<(String, u16)>,
    Json(request): Json<SpendRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = parse_owner(&owner)?;
    state
        .lifecycle()
        .check_spending_limit(&owner, index, request.amount)
        .await?;

    Ok(Json(serde_json::json!({ "allowed": true })))
}

/// POST /api/v1/identity/:owner/contexts/:index/spend
#[instrument(skip(state, request))]
async fn record_spending(
    State(state): State<AppState>,
    Path((owner, index)): Path<(String, u16)>,
    Json(request): Json<SpendRequest>,
) -> Result<Json<ContextResponse>, ApiError> {
    let owner = parse_owner(&owner)?;
    let context = state
        .lifecycle()
        .record_spending(&owner, index, request.amount)
        .await?;

    context_response(&state, &owner, context)
}

//! # Prism - Identity Server
//!
//! Privacy-preserving identity management with solvency proofs.
//!
//! ## Features
//!
//! - Deterministic root and context identity addresses
//! - Context lifecycle: create, spend within limits, revoke
//! - Solvency proofs (`balance >= threshold`) with RISC Zero, or simulated
//!   proofs when no circuit is available
//! - REST API over an in-process ledger
//!
//! ## Usage
//!
//! ```bash
//! # Development mode (simulated proofs)
//! DEV_MODE=true cargo run
//!
//! # Cryptographic proofs
//! CIRCUIT_PATH=target/circuits/solvency-proof.bin cargo run --features risc0
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Detailed server status
//! - `POST /api/v1/identity/root` - Ensure the server wallet's root identity
//! - `POST /api/v1/identity/:owner/contexts` - Create a context identity
//! - `POST /api/v1/proof/generate` - Generate a solvency proof
//! - `POST /api/v1/proof/verify` - Verify a solvency proof

use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use prism_server::config::Config;
use prism_server::routes::create_routes;
use prism_server::services::{
    AddressDeriver, IdentityLifecycle, MemoryLedger, SolvencyProofEngine, Wallet,
};
use prism_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config);

    let program_id = config.program_id().context("Invalid PROGRAM_ID")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        dev_mode = config.dev_mode,
        %program_id,
        "Starting Prism Identity Server"
    );

    // Initialize proof engine
    let engine = SolvencyProofEngine::new(config.prover_config());
    let mode = engine.initialize().await;
    info!(mode = mode.as_str(), "Solvency proof engine ready");

    // Initialize ledger and wallet
    let ledger = Arc::new(MemoryLedger::new(program_id));
    let state = match &config.wallet_secret_key {
        Some(secret) => {
            let wallet = Wallet::from_hex(secret).context("Invalid WALLET_SECRET_KEY")?;
            info!(wallet = %wallet.address(), "Wallet loaded");
            AppState::in_memory(
                engine,
                ledger,
                wallet,
                config.initial_lamports,
                config.lifecycle_config(),
            )
            .await
        }
        None => {
            warn!("No WALLET_SECRET_KEY configured; identity mutations are disabled");
            let lifecycle = IdentityLifecycle::new(ledger, AddressDeriver::new(program_id))
                .with_config(config.lifecycle_config());
            AppState::new(engine, lifecycle, None)
        }
    };

    // Build CORS layer
    let cors = build_cors(&config)?;

    // Build router
    let app = create_routes(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = config.socket_addr().context("Invalid HOST/PORT")?;
    info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_cors(config: &Config) -> anyhow::Result<CorsLayer> {
    let origin = if config.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins = config
            .cors_origins
            .iter()
            .map(|o| HeaderValue::from_str(o))
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid CORS_ORIGINS")?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(origin))
}

/// Initialize logging based on configuration
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    }
}

//! Application State
//!
//! Shared state for the identity server, accessible from all route handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::services::{
    AddressDeriver, IdentityLifecycle, LifecycleConfig, MemoryLedger, SolvencyProofEngine, Wallet,
};
use crate::types::Address;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Solvency proof engine
    engine: SolvencyProofEngine,
    /// Identity lifecycle over the ledger
    lifecycle: IdentityLifecycle,
    /// Server wallet, if one is configured
    wallet: Option<Address>,
    /// Total proofs generated
    total_proofs: AtomicU64,
    /// Server start time
    start_time: Instant,
}

impl AppState {
    /// Create a new application state
    pub fn new(
        engine: SolvencyProofEngine,
        lifecycle: IdentityLifecycle,
        wallet: Option<Address>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                engine,
                lifecycle,
                wallet,
                total_proofs: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    /// State backed by a fresh in-process ledger with one funded wallet
    pub async fn in_memory(
        engine: SolvencyProofEngine,
        ledger: Arc<MemoryLedger>,
        wallet: Wallet,
        lamports: u64,
        config: LifecycleConfig,
    ) -> Self {
        let owner = wallet.address();
        ledger.airdrop(owner, lamports).await;

        let deriver = AddressDeriver::new(ledger.program_id());
        let lifecycle = IdentityLifecycle::new(ledger, deriver)
            .with_wallet(wallet)
            .with_config(config);
        Self::new(engine, lifecycle, Some(owner))
    }

    pub fn engine(&self) -> &SolvencyProofEngine {
        &self.inner.engine
    }

    pub fn lifecycle(&self) -> &IdentityLifecycle {
        &self.inner.lifecycle
    }

    /// Address of the server wallet
    pub fn wallet(&self) -> Option<Address> {
        self.inner.wallet
    }

    /// Get total proofs generated
    pub fn total_proofs_generated(&self) -> u64 {
        self.inner.total_proofs.load(Ordering::Relaxed)
    }

    /// Increment proof counter
    pub fn increment_proofs(&self) {
        self.inner.total_proofs.fetch_add(1, Ordering::Relaxed);
    }

    /// Get server uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}

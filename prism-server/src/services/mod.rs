//! Services for the identity server
//!
//! Address derivation, ledger access, identity lifecycle and solvency proofs.

pub mod derivation;
pub mod identity;
pub mod ledger;
pub mod prover;
#[cfg(feature = "risc0")]
pub mod risc0;
pub mod wallet;

pub use derivation::AddressDeriver;
pub use identity::{IdentityLifecycle, LifecycleConfig};
pub use ledger::{ConfirmPolicy, LedgerClient, MemoryLedger};
pub use prover::{ProverConfig, SolvencyProofEngine};
pub use wallet::Wallet;

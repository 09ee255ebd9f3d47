//! # Solvency Proof Circuit (RISC Zero Guest)
//!
//! Proves `actual_balance >= threshold` without revealing the balance.
//!
//! ## Private Inputs
//! - actual_balance: u64
//!
//! ## Public Outputs
//! - threshold: u64
//! - is_solvent: bool

use risc0_zkvm::guest::env;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct SolvencyInput {
    actual_balance: u64,
    threshold: u64,
}

#[derive(Serialize, Deserialize)]
struct SolvencyJournal {
    threshold: u64,
    is_solvent: bool,
}

fn main() {
    let input: SolvencyInput = env::read();

    // An unsatisfied claim produces no receipt
    assert!(
        input.actual_balance >= input.threshold,
        "balance below threshold"
    );

    env::commit(&SolvencyJournal {
        threshold: input.threshold,
        is_solvent: true,
    });
}

//! Solvency proof types
//!
//! `SolvencyProof` is the wire format: the backend proof bytes alone are not
//! enough to verify later, the public inputs travel with them.

use serde::{Deserialize, Serialize};

use crate::error::ProofError;

/// Which path produced (or verifies) a proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofMode {
    /// Real proving backend
    Cryptographic,
    /// Placeholder proofs with no soundness guarantee
    Simulated,
}

impl ProofMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofMode::Cryptographic => "cryptographic",
            ProofMode::Simulated => "simulated",
        }
    }
}

/// Public inputs bound to a solvency proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicInputs {
    pub threshold: u64,
    pub is_solvent: bool,
}

/// Proof that a private balance is at least `public_inputs.threshold`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolvencyProof {
    /// Opaque backend proof (or simulated placeholder)
    #[serde(with = "super::hex_bytes")]
    pub proof: Vec<u8>,
    pub public_inputs: PublicInputs,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl SolvencyProof {
    /// Encode for storage or transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProofError> {
        bincode::serialize(self).map_err(|e| ProofError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProofError> {
        bincode::deserialize(bytes).map_err(|e| ProofError::Serialization(e.to_string()))
    }
}

/// Result of a generation call, tagged with the mode actually used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedProof {
    pub proof: SolvencyProof,
    pub mode: ProofMode,
}

impl GeneratedProof {
    pub fn is_cryptographic(&self) -> bool {
        self.mode == ProofMode::Cryptographic
    }
}

/// Static description of the solvency circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitInfo {
    pub name: String,
    pub private_inputs: Vec<String>,
    pub public_inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl Default for CircuitInfo {
    fn default() -> Self {
        Self {
            name: "solvency".to_string(),
            private_inputs: vec!["actual_balance".to_string()],
            public_inputs: vec!["threshold".to_string()],
            outputs: vec!["is_solvent".to_string()],
        }
    }
}

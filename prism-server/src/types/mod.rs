//! Type definitions for the Prism server
//!
//! Account records, proof wire types, and the request/response types of the
//! HTTP API.

pub mod identity;
pub mod proof;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use identity::{AccountData, Address, ContextIdentity, ContextType, PrivacyLevel, RootIdentity};
pub use proof::{CircuitInfo, GeneratedProof, ProofMode, PublicInputs, SolvencyProof};

/// Helper for serializing byte vectors as hex strings
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

/// Helper for serializing fixed-size byte arrays larger than 32 bytes
mod bytes64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(data: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes"))
    }
}

/// Ed25519 signature identifying a submitted transaction
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxSignature(#[serde(with = "bytes64")] pub [u8; 64]);

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxSignature({}..)", &hex::encode(&self.0[..8]))
    }
}

/// Error codes returned by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed or out-of-range input
    InvalidInput,
    AlreadyExists,
    NotFound,
    AlreadyRevoked,
    /// Context index taken concurrently; re-fetch and retry
    IndexConflict,
    ContextRevoked,
    ExceedsTransactionLimit,
    SpendingOverflow,
    MutationInFlight,
    WalletNotReady,
    InsufficientFunds,
    ProgramRejected,
    /// Inconclusive; re-query state
    ConfirmationTimeout,
    /// Balance below threshold
    ProofWouldFail,
    ProofGenerationFailed,
    InternalError,
}

// ==================== Request Types ====================

/// Request to provision the root identity of the server wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRootRequest {
    /// Privacy level, 0 (maximum) to 4 (public)
    pub privacy_level: u8,
}

/// Request to change the privacy level of a root identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePrivacyRequest {
    pub privacy_level: u8,
}

/// Request to create a context identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContextRequest {
    /// Context type, 0 (DeFi) to 5 (public)
    pub context_type: u8,
    /// Per-transaction spending cap in native units
    pub max_per_transaction: u64,
}

/// Amount checked or recorded against a context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRequest {
    pub amount: u64,
}

/// Request to generate a solvency proof
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateProofRequest {
    /// Private balance (never leaves the server)
    pub actual_balance: i64,
    /// Public threshold
    pub threshold: i64,
}

/// Request to verify a solvency proof
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyProofRequest {
    pub proof: SolvencyProof,
}

// ==================== Response Types ====================

/// Root identity together with its derived address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub address: Address,
    pub root: RootIdentity,
}

/// Context identity together with its derived address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResponse {
    pub address: Address,
    pub context: ContextIdentity,
}

/// Response from proof generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateProofResponse {
    pub request_id: String,
    pub proof: SolvencyProof,
    /// Mode used for this particular proof
    pub mode: ProofMode,
    pub generation_time_ms: u64,
}

/// Response from proof verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyProofResponse {
    pub valid: bool,
    /// Simulated verification gives no cryptographic assurance
    pub mode: ProofMode,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    /// Program error code parsed from ledger logs, if any
    pub details: Option<serde_json::Value>,
}

/// Server health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub proof_mode: Option<ProofMode>,
}

/// Server status with more details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub proof_mode: Option<ProofMode>,
    pub mock_mode: bool,
    /// Generations that fell back to a simulated proof
    pub degraded_proofs: u64,
    pub circuit: CircuitInfo,
    pub program_id: Address,
    pub wallet: Option<Address>,
    pub total_proofs: u64,
    pub uptime_secs: u64,
}

//! Error taxonomy
//!
//! Validation errors abort before any I/O. Lifecycle and network errors carry
//! enough structure for the caller to decide whether to re-fetch and retry.
//! Proof backend failures are normally absorbed into a mode downgrade and
//! only reach the caller when per-call fallback is disabled.

use std::fmt;

use thiserror::Error;

use crate::types::TxSignature;

/// Malformed or out-of-range input, detected synchronously
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid privacy level {0}: must be 0-4")]
    InvalidPrivacyLevel(u8),
    #[error("Invalid context type {0}: must be 0-5")]
    InvalidContextType(u8),
    #[error("{field} must be non-negative, got {value}")]
    NegativeAmount { field: &'static str, value: i64 },
    #[error("Context count {0} no longer fits a 16-bit context index")]
    ContextIndexOverflow(u32),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Identity state-machine violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Account already exists")]
    AlreadyExists,
    #[error("Account not found")]
    NotFound,
    #[error("Context already revoked")]
    AlreadyRevoked,
    #[error("Context index {expected} is already in use; re-read the root and retry")]
    IndexConflict { expected: u16 },
    #[error("Context is revoked and cannot be used")]
    ContextRevoked,
    #[error("Amount exceeds transaction limit for this context")]
    ExceedsTransactionLimit,
    #[error("Spending overflow: total spent would exceed u64 max")]
    SpendingOverflow,
    #[error("Another mutation for this owner is already in flight")]
    MutationInFlight,
}

/// Program error codes the ledger reports in its diagnostic logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramErrorCode {
    Unauthorized,
    ContextMismatch,
    ContextAlreadyRevoked,
    ContextRevoked,
    ExceedsTransactionLimit,
    SpendingOverflow,
    InvalidPrivacyLevel,
    InvalidContextType,
    IndexConflict,
}

impl ProgramErrorCode {
    const ALL: [ProgramErrorCode; 9] = [
        ProgramErrorCode::Unauthorized,
        ProgramErrorCode::ContextMismatch,
        ProgramErrorCode::ContextAlreadyRevoked,
        ProgramErrorCode::ContextRevoked,
        ProgramErrorCode::ExceedsTransactionLimit,
        ProgramErrorCode::SpendingOverflow,
        ProgramErrorCode::InvalidPrivacyLevel,
        ProgramErrorCode::InvalidContextType,
        ProgramErrorCode::IndexConflict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramErrorCode::Unauthorized => "Unauthorized",
            ProgramErrorCode::ContextMismatch => "ContextMismatch",
            ProgramErrorCode::ContextAlreadyRevoked => "ContextAlreadyRevoked",
            ProgramErrorCode::ContextRevoked => "ContextRevoked",
            ProgramErrorCode::ExceedsTransactionLimit => "ExceedsTransactionLimit",
            ProgramErrorCode::SpendingOverflow => "SpendingOverflow",
            ProgramErrorCode::InvalidPrivacyLevel => "InvalidPrivacyLevel",
            ProgramErrorCode::InvalidContextType => "InvalidContextType",
            ProgramErrorCode::IndexConflict => "IndexConflict",
        }
    }

    /// Human-readable message, as the program logs it
    pub fn message(&self) -> &'static str {
        match self {
            ProgramErrorCode::Unauthorized => "Unauthorized: You don't own this identity",
            ProgramErrorCode::ContextMismatch => {
                "Context mismatch: Context doesn't belong to this root"
            }
            ProgramErrorCode::ContextAlreadyRevoked => "Context already revoked",
            ProgramErrorCode::ContextRevoked => "Context is revoked and cannot be used",
            ProgramErrorCode::ExceedsTransactionLimit => {
                "Amount exceeds transaction limit for this context"
            }
            ProgramErrorCode::SpendingOverflow => {
                "Spending overflow: Total spent would exceed u64 max"
            }
            ProgramErrorCode::InvalidPrivacyLevel => "Invalid privacy level: Must be 0-4",
            ProgramErrorCode::InvalidContextType => "Invalid context type: Must be 0-5",
            ProgramErrorCode::IndexConflict => "Context index does not match root context count",
        }
    }

    /// Extract the first `Error Code: <Name>` found in ledger diagnostic logs
    pub fn parse_logs<S: AsRef<str>>(logs: &[S]) -> Option<Self> {
        logs.iter().find_map(|line| {
            let (_, rest) = line.as_ref().split_once("Error Code: ")?;
            let name = rest
                .split(|c: char| !c.is_ascii_alphanumeric())
                .next()
                .unwrap_or_default();
            Self::ALL.into_iter().find(|code| code.as_str() == name)
        })
    }
}

impl fmt::Display for ProgramErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger submission and query failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Wallet not ready: no signing key available for {0}")]
    WalletNotReady(String),
    #[error("Insufficient funds to pay for the transaction")]
    InsufficientFunds,
    #[error("Program rejected transaction: {message}")]
    ProgramRejected {
        reason: Option<ProgramErrorCode>,
        message: String,
    },
    #[error("Transaction {signature} not confirmed after {attempts} polls; re-query state")]
    ConfirmationTimeout {
        signature: TxSignature,
        attempts: u32,
    },
    #[error("Malformed account data: {0}")]
    MalformedAccount(String),
    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Proof engine failures that reach the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("Balance is below threshold {threshold}; a solvency proof would fail")]
    ProofWouldFail { threshold: u64 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Proving backend failed: {0}")]
    Backend(String),
    #[error("Proof serialization failed: {0}")]
    Serialization(String),
}

/// Address derivation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    #[error("No off-curve nonce found for the given seeds")]
    NoViableNonce,
}

/// Top-level error for identity and proof operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrismError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Proof(#[from] ProofError),
    #[error(transparent)]
    Derivation(#[from] DerivationError),
}

pub type PrismResult<T> = Result<T, PrismError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program_error_from_logs() {
        let logs = vec![
            "Program log: Instruction: RevokeContext".to_string(),
            "Program log: AnchorError occurred. Error Code: ContextAlreadyRevoked. Error Number: 6002."
                .to_string(),
        ];

        assert_eq!(
            ProgramErrorCode::parse_logs(&logs),
            Some(ProgramErrorCode::ContextAlreadyRevoked)
        );
    }

    #[test]
    fn test_parse_program_error_ignores_unknown_codes() {
        let logs = ["Program log: Error Code: SomethingElse"];
        assert_eq!(ProgramErrorCode::parse_logs(&logs), None);
        assert_eq!(ProgramErrorCode::parse_logs::<&str>(&[]), None);
    }
}

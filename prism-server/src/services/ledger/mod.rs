//! Ledger boundary
//!
//! All persisted state lives behind [`LedgerClient`]. The client submits
//! signed program instructions, reads raw account bytes, and queries the
//! commitment status of a submitted signature.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::debug;

use crate::error::{LifecycleError, NetworkError, PrismError, ProgramErrorCode};
use crate::types::{Address, TxSignature};

pub use memory::{MemoryLedger, ProgramEvent};

/// Log fragment the ledger emits when an account address is taken
pub const ACCOUNT_IN_USE_LOG: &str = "already in use";

/// Identity program instructions
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Instruction {
    CreateRootIdentity {
        privacy_level: u8,
    },
    CreateContext {
        context_type: u8,
        max_per_transaction: u64,
        /// Index the client read from the root; the ledger rejects a mismatch
        context_index: u16,
    },
    RevokeContext {
        context_index: u16,
    },
    RecordSpending {
        context_index: u16,
        amount: u64,
    },
    UpdatePrivacyLevel {
        new_privacy_level: u8,
    },
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::CreateRootIdentity { .. } => "CreateRootIdentity",
            Instruction::CreateContext { .. } => "CreateContext",
            Instruction::RevokeContext { .. } => "RevokeContext",
            Instruction::RecordSpending { .. } => "RecordSpending",
            Instruction::UpdatePrivacyLevel { .. } => "UpdatePrivacyLevel",
        }
    }
}

/// Signed instruction ready for submission
#[derive(Debug, Clone)]
pub struct Transaction {
    pub program_id: Address,
    pub signer: Address,
    /// Makes repeated identical instructions distinct transactions
    pub nonce: u64,
    pub instruction: Instruction,
    pub signature: TxSignature,
}

impl Transaction {
    /// Bytes covered by the signature
    pub fn message(
        program_id: &Address,
        signer: &Address,
        nonce: u64,
        instruction: &Instruction,
    ) -> Vec<u8> {
        let mut message = Vec::with_capacity(96);
        message.extend_from_slice(program_id.as_bytes());
        message.extend_from_slice(signer.as_bytes());
        message.extend_from_slice(&nonce.to_le_bytes());
        // Writing into a Vec cannot fail
        let _ = borsh::to_writer(&mut message, instruction);
        message
    }

    pub fn verify_signature(&self) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(self.signer.as_bytes()) else {
            return false;
        };
        let message = Self::message(&self.program_id, &self.signer, self.nonce, &self.instruction);
        key.verify(&message, &Signature::from_bytes(&self.signature.0))
            .is_ok()
    }
}

/// Commitment level of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

/// Raw submission failure as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Payer cannot cover fees or rent
    InsufficientFunds { required: u64, available: u64 },
    /// Program execution failed; diagnostic logs attached
    Rejected { logs: Vec<String> },
    /// Transport or pre-execution failure
    Rpc(String),
}

/// Submit/fetch capability of the ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn submit(&self, transaction: Transaction) -> Result<TxSignature, SubmitError>;

    async fn fetch_account(&self, address: &Address) -> Result<Option<Vec<u8>>, NetworkError>;

    async fn signature_status(
        &self,
        signature: &TxSignature,
    ) -> Result<Option<Commitment>, NetworkError>;
}

/// Map a raw submission failure onto the error taxonomy
pub fn classify_submit_error(error: SubmitError) -> PrismError {
    match error {
        SubmitError::InsufficientFunds { .. } => NetworkError::InsufficientFunds.into(),
        SubmitError::Rpc(message) => NetworkError::Rpc(message).into(),
        SubmitError::Rejected { logs } => {
            if logs.iter().any(|line| line.contains(ACCOUNT_IN_USE_LOG)) {
                return LifecycleError::AlreadyExists.into();
            }

            let reason = ProgramErrorCode::parse_logs(&logs);
            match reason {
                Some(ProgramErrorCode::ContextAlreadyRevoked) => LifecycleError::AlreadyRevoked.into(),
                Some(ProgramErrorCode::ContextRevoked) => LifecycleError::ContextRevoked.into(),
                Some(ProgramErrorCode::ExceedsTransactionLimit) => {
                    LifecycleError::ExceedsTransactionLimit.into()
                }
                Some(ProgramErrorCode::SpendingOverflow) => LifecycleError::SpendingOverflow.into(),
                _ => {
                    let message = logs
                        .iter()
                        .rev()
                        .find(|line| line.contains("Error"))
                        .or_else(|| logs.last())
                        .cloned()
                        .unwrap_or_else(|| "transaction rejected".to_string());
                    NetworkError::ProgramRejected { reason, message }.into()
                }
            }
        }
    }
}

/// Bounded exponential backoff for commitment polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            max_attempts: 10,
        }
    }
}

impl ConfirmPolicy {
    /// Delay before poll number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Poll until the signature reaches at least `Confirmed`
///
/// Timing out is inconclusive: the transaction may still land, so callers
/// re-query state instead of treating it as failed.
pub async fn await_confirmation(
    ledger: &dyn LedgerClient,
    signature: &TxSignature,
    policy: &ConfirmPolicy,
) -> Result<Commitment, NetworkError> {
    for attempt in 1..=policy.max_attempts {
        match ledger.signature_status(signature).await? {
            Some(commitment) if commitment >= Commitment::Confirmed => {
                debug!(%signature, attempt, ?commitment, "Transaction confirmed");
                return Ok(commitment);
            }
            status => {
                debug!(%signature, attempt, ?status, "Waiting for confirmation");
            }
        }
        tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
    }

    Err(NetworkError::ConfirmationTimeout {
        signature: *signature,
        attempts: policy.max_attempts,
    })
}

//! In-process ledger
//!
//! Runs the identity program against an in-memory account store. It is the
//! arbiter for context index assignment: a `CreateContext` whose index is not
//! the root's current `context_count`, or whose address is already taken, is
//! rejected, so no duplicate index is ever persisted.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Commitment, Instruction, LedgerClient, SubmitError, Transaction, ACCOUNT_IN_USE_LOG};
use crate::error::{NetworkError, ProgramErrorCode};
use crate::services::derivation::AddressDeriver;
use crate::types::{
    AccountData, Address, ContextIdentity, ContextType, PrivacyLevel, RootIdentity, TxSignature,
};

/// Lamports charged per byte of allocated account space
pub const DEFAULT_RENT_PER_BYTE: u64 = 6_960;

/// Events emitted by successful instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramEvent {
    RootIdentityCreated {
        owner: Address,
        privacy_level: PrivacyLevel,
        timestamp: i64,
    },
    ContextCreated {
        root_identity: Address,
        context_identity: Address,
        context_type: ContextType,
        max_per_transaction: u64,
        context_index: u16,
        timestamp: i64,
    },
    ContextRevoked {
        root_identity: Address,
        context_identity: Address,
        context_type: ContextType,
        total_spent: u64,
        timestamp: i64,
    },
    SpendingRecorded {
        context_identity: Address,
        amount: u64,
        total_spent: u64,
        timestamp: i64,
    },
    PrivacyLevelUpdated {
        root_identity: Address,
        old_level: PrivacyLevel,
        new_level: PrivacyLevel,
        timestamp: i64,
    },
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Address, Vec<u8>>,
    balances: HashMap<Address, u64>,
    /// Remaining polls before each signature reports `Confirmed`
    signatures: HashMap<TxSignature, u32>,
    events: Vec<ProgramEvent>,
}

/// Program failure: either a funding problem or logged rejection
enum Failure {
    Funds { required: u64, available: u64 },
    Logs(Vec<String>),
}

/// In-memory ledger running the identity program
///
/// Meant for development and tests: every signature and event is kept for
/// the lifetime of the ledger, so both logs grow without bound.
pub struct MemoryLedger {
    program_id: Address,
    deriver: AddressDeriver,
    rent_per_byte: u64,
    confirmation_lag: u32,
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new(program_id: Address) -> Self {
        Self {
            program_id,
            deriver: AddressDeriver::new(program_id),
            rent_per_byte: DEFAULT_RENT_PER_BYTE,
            confirmation_lag: 0,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Number of status polls a new signature stays at `Processed`
    pub fn with_confirmation_lag(mut self, polls: u32) -> Self {
        self.confirmation_lag = polls;
        self
    }

    pub fn with_rent_per_byte(mut self, lamports: u64) -> Self {
        self.rent_per_byte = lamports;
        self
    }

    pub fn program_id(&self) -> Address {
        self.program_id
    }

    /// Credit native units to an address
    pub async fn airdrop(&self, address: Address, lamports: u64) {
        let mut state = self.state.lock().await;
        let balance = state.balances.entry(address).or_default();
        *balance = balance.saturating_add(lamports);
    }

    pub async fn balance(&self, address: &Address) -> u64 {
        self.state
            .lock()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    /// Events emitted so far, oldest first
    pub async fn events(&self) -> Vec<ProgramEvent> {
        self.state.lock().await.events.clone()
    }

    /// Rent charged for an account of `size` bytes
    pub fn rent_for(&self, size: usize) -> u64 {
        self.rent_per_byte.saturating_mul(size as u64)
    }

    fn program_error(&self, logs: &mut Vec<String>, code: ProgramErrorCode) -> Failure {
        let number = 6000 + code as u32;
        logs.push(format!(
            "Program log: AnchorError occurred. Error Code: {}. Error Number: {}. Error Message: {}.",
            code.as_str(),
            number,
            code.message()
        ));
        logs.push(format!("Program {} failed: custom program error: {:#x}", self.program_id, number));
        Failure::Logs(std::mem::take(logs))
    }

    fn account_missing(&self, logs: &mut Vec<String>, what: &str) -> Failure {
        logs.push(format!(
            "Program log: AnchorError caused by account: {what}. Error Code: AccountNotInitialized. Error Number: 3012. Error Message: The program expected this account to be already initialized."
        ));
        Failure::Logs(std::mem::take(logs))
    }

    fn account_in_use(&self, logs: &mut Vec<String>, address: &Address) -> Failure {
        logs.push(format!(
            "Allocate: account Address {{ address: {address}, base: None }} {ACCOUNT_IN_USE_LOG}"
        ));
        logs.push(format!(
            "Program {} failed: custom program error: 0x0",
            self.program_id
        ));
        Failure::Logs(std::mem::take(logs))
    }

    fn charge_rent(
        &self,
        state: &mut LedgerState,
        payer: &Address,
        size: usize,
    ) -> Result<(), Failure> {
        let required = self.rent_for(size);
        let available = state.balances.get(payer).copied().unwrap_or_default();
        if available < required {
            return Err(Failure::Funds {
                required,
                available,
            });
        }
        state.balances.insert(*payer, available - required);
        Ok(())
    }

    fn load<T: AccountData>(state: &LedgerState, address: &Address) -> Option<T> {
        state
            .accounts
            .get(address)
            .and_then(|bytes| T::from_account_bytes(bytes).ok())
    }

    /// Load the signer's root and check ownership
    fn load_owned_root(
        &self,
        state: &LedgerState,
        signer: &Address,
        logs: &mut Vec<String>,
    ) -> Result<(Address, RootIdentity), Failure> {
        let (root_address, _) = self
            .deriver
            .derive_root(signer)
            .map_err(|e| Failure::Logs(vec![e.to_string()]))?;
        let root: RootIdentity = Self::load(state, &root_address)
            .ok_or_else(|| self.account_missing(logs, "root_identity"))?;
        if root.owner != *signer {
            return Err(self.program_error(logs, ProgramErrorCode::Unauthorized));
        }
        Ok((root_address, root))
    }

    /// Load a context of the signer's root and check it belongs to it
    fn load_owned_context(
        &self,
        state: &LedgerState,
        root_address: &Address,
        context_index: u16,
        logs: &mut Vec<String>,
    ) -> Result<(Address, ContextIdentity), Failure> {
        let (context_address, _) = self
            .deriver
            .derive_context(root_address, context_index)
            .map_err(|e| Failure::Logs(vec![e.to_string()]))?;
        let context: ContextIdentity = Self::load(state, &context_address)
            .ok_or_else(|| self.account_missing(logs, "context_identity"))?;
        if context.root_identity != *root_address {
            return Err(self.program_error(logs, ProgramErrorCode::ContextMismatch));
        }
        Ok((context_address, context))
    }

    fn execute(&self, state: &mut LedgerState, tx: &Transaction) -> Result<ProgramEvent, Failure> {
        let signer = tx.signer;
        let timestamp = chrono::Utc::now().timestamp();
        let mut logs = vec![
            format!("Program {} invoke [1]", self.program_id),
            format!("Program log: Instruction: {}", tx.instruction.name()),
        ];

        match tx.instruction {
            Instruction::CreateRootIdentity { privacy_level } => {
                let privacy_level = PrivacyLevel::try_from(privacy_level)
                    .map_err(|_| self.program_error(&mut logs, ProgramErrorCode::InvalidPrivacyLevel))?;
                let (root_address, nonce) = self
                    .deriver
                    .derive_root(&signer)
                    .map_err(|e| Failure::Logs(vec![e.to_string()]))?;
                if state.accounts.contains_key(&root_address) {
                    return Err(self.account_in_use(&mut logs, &root_address));
                }
                self.charge_rent(state, &signer, RootIdentity::SIZE)?;

                let root = RootIdentity {
                    owner: signer,
                    created_at: timestamp,
                    privacy_level,
                    context_count: 0,
                    derivation_nonce: nonce,
                };
                state.accounts.insert(root_address, root.to_account_bytes());

                Ok(ProgramEvent::RootIdentityCreated {
                    owner: signer,
                    privacy_level,
                    timestamp,
                })
            }
            Instruction::CreateContext {
                context_type,
                max_per_transaction,
                context_index,
            } => {
                let context_type = ContextType::try_from(context_type)
                    .map_err(|_| self.program_error(&mut logs, ProgramErrorCode::InvalidContextType))?;
                let (root_address, mut root) = self.load_owned_root(state, &signer, &mut logs)?;

                if root.context_count != u32::from(context_index) {
                    return Err(self.program_error(&mut logs, ProgramErrorCode::IndexConflict));
                }
                let (context_address, nonce) = self
                    .deriver
                    .derive_context(&root_address, context_index)
                    .map_err(|e| Failure::Logs(vec![e.to_string()]))?;
                if state.accounts.contains_key(&context_address) {
                    return Err(self.account_in_use(&mut logs, &context_address));
                }
                self.charge_rent(state, &signer, ContextIdentity::SIZE)?;

                let context = ContextIdentity {
                    root_identity: root_address,
                    context_type,
                    created_at: timestamp,
                    max_per_transaction,
                    total_spent: 0,
                    revoked: false,
                    context_index,
                    derivation_nonce: nonce,
                };
                root.context_count += 1;

                state.accounts.insert(context_address, context.to_account_bytes());
                state.accounts.insert(root_address, root.to_account_bytes());

                Ok(ProgramEvent::ContextCreated {
                    root_identity: root_address,
                    context_identity: context_address,
                    context_type,
                    max_per_transaction,
                    context_index,
                    timestamp,
                })
            }
            Instruction::RevokeContext { context_index } => {
                let (root_address, _) = self.load_owned_root(state, &signer, &mut logs)?;
                let (context_address, mut context) =
                    self.load_owned_context(state, &root_address, context_index, &mut logs)?;
                if context.revoked {
                    return Err(self.program_error(&mut logs, ProgramErrorCode::ContextAlreadyRevoked));
                }

                context.revoked = true;
                state.accounts.insert(context_address, context.to_account_bytes());

                Ok(ProgramEvent::ContextRevoked {
                    root_identity: root_address,
                    context_identity: context_address,
                    context_type: context.context_type,
                    total_spent: context.total_spent,
                    timestamp,
                })
            }
            Instruction::RecordSpending {
                context_index,
                amount,
            } => {
                let (root_address, _) = self.load_owned_root(state, &signer, &mut logs)?;
                let (context_address, mut context) =
                    self.load_owned_context(state, &root_address, context_index, &mut logs)?;
                if context.revoked {
                    return Err(self.program_error(&mut logs, ProgramErrorCode::ContextRevoked));
                }
                if amount > context.max_per_transaction {
                    return Err(
                        self.program_error(&mut logs, ProgramErrorCode::ExceedsTransactionLimit)
                    );
                }
                context.total_spent = context
                    .total_spent
                    .checked_add(amount)
                    .ok_or_else(|| self.program_error(&mut logs, ProgramErrorCode::SpendingOverflow))?;
                state.accounts.insert(context_address, context.to_account_bytes());

                Ok(ProgramEvent::SpendingRecorded {
                    context_identity: context_address,
                    amount,
                    total_spent: context.total_spent,
                    timestamp,
                })
            }
            Instruction::UpdatePrivacyLevel { new_privacy_level } => {
                let new_level = PrivacyLevel::try_from(new_privacy_level)
                    .map_err(|_| self.program_error(&mut logs, ProgramErrorCode::InvalidPrivacyLevel))?;
                let (root_address, mut root) = self.load_owned_root(state, &signer, &mut logs)?;

                let old_level = root.privacy_level;
                root.privacy_level = new_level;
                state.accounts.insert(root_address, root.to_account_bytes());

                Ok(ProgramEvent::PrivacyLevelUpdated {
                    root_identity: root_address,
                    old_level,
                    new_level,
                    timestamp,
                })
            }
        }
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn submit(&self, transaction: Transaction) -> Result<TxSignature, SubmitError> {
        if transaction.program_id != self.program_id {
            return Err(SubmitError::Rpc(format!(
                "unknown program {}",
                transaction.program_id
            )));
        }
        if !transaction.verify_signature() {
            return Err(SubmitError::Rpc(
                "Transaction signature verification failure".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        if state.signatures.contains_key(&transaction.signature) {
            return Err(SubmitError::Rpc(
                "This transaction has already been processed".to_string(),
            ));
        }

        match self.execute(&mut state, &transaction) {
            Ok(event) => {
                debug!(
                    signature = %transaction.signature,
                    instruction = transaction.instruction.name(),
                    "Transaction executed"
                );
                state
                    .signatures
                    .insert(transaction.signature, self.confirmation_lag);
                state.events.push(event);
                Ok(transaction.signature)
            }
            Err(Failure::Funds {
                required,
                available,
            }) => {
                warn!(required, available, "Transaction rejected: insufficient funds");
                Err(SubmitError::InsufficientFunds {
                    required,
                    available,
                })
            }
            Err(Failure::Logs(logs)) => {
                warn!(
                    instruction = transaction.instruction.name(),
                    log = logs.last().map(String::as_str).unwrap_or_default(),
                    "Transaction rejected by program"
                );
                Err(SubmitError::Rejected { logs })
            }
        }
    }

    async fn fetch_account(&self, address: &Address) -> Result<Option<Vec<u8>>, NetworkError> {
        Ok(self.state.lock().await.accounts.get(address).cloned())
    }

    async fn signature_status(
        &self,
        signature: &TxSignature,
    ) -> Result<Option<Commitment>, NetworkError> {
        let mut state = self.state.lock().await;
        Ok(state.signatures.get_mut(signature).map(|remaining| {
            if *remaining > 0 {
                *remaining -= 1;
                Commitment::Processed
            } else {
                Commitment::Confirmed
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::derivation::default_program_id;
    use crate::services::wallet::Wallet;

    async fn funded_ledger(wallet: &Wallet) -> MemoryLedger {
        let ledger = MemoryLedger::new(default_program_id());
        ledger.airdrop(wallet.address(), 1_000_000_000).await;
        ledger
    }

    fn create_context(index: u16) -> Instruction {
        Instruction::CreateContext {
            context_type: 0,
            max_per_transaction: 1_000,
            context_index: index,
        }
    }

    #[tokio::test]
    async fn test_duplicate_index_is_rejected() {
        let wallet = Wallet::generate();
        let ledger = funded_ledger(&wallet).await;
        let program = ledger.program_id();

        ledger
            .submit(wallet.sign(program, Instruction::CreateRootIdentity { privacy_level: 0 }))
            .await
            .unwrap();

        // Two clients both read context_count == 0
        let first = wallet.sign(program, create_context(0));
        let second = wallet.sign(program, create_context(0));

        assert!(ledger.submit(first).await.is_ok());
        match ledger.submit(second).await {
            Err(SubmitError::Rejected { logs }) => {
                assert_eq!(
                    ProgramErrorCode::parse_logs(&logs),
                    Some(ProgramErrorCode::IndexConflict)
                );
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        let created = ledger
            .events()
            .await
            .into_iter()
            .filter(|e| matches!(e, ProgramEvent::ContextCreated { .. }))
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_rent_is_charged_and_enforced() {
        let wallet = Wallet::generate();
        let ledger = MemoryLedger::new(default_program_id());
        let rent = ledger.rent_for(RootIdentity::SIZE);
        ledger.airdrop(wallet.address(), rent - 1).await;

        let tx = wallet.sign(
            ledger.program_id(),
            Instruction::CreateRootIdentity { privacy_level: 1 },
        );
        assert!(matches!(
            ledger.submit(tx).await,
            Err(SubmitError::InsufficientFunds { .. })
        ));

        ledger.airdrop(wallet.address(), 1).await;
        let tx = wallet.sign(
            ledger.program_id(),
            Instruction::CreateRootIdentity { privacy_level: 1 },
        );
        assert!(ledger.submit(tx).await.is_ok());
        assert_eq!(ledger.balance(&wallet.address()).await, 0);
    }

    #[tokio::test]
    async fn test_confirmation_lag() {
        let wallet = Wallet::generate();
        let ledger = funded_ledger(&wallet).await.with_confirmation_lag(2);

        let signature = ledger
            .submit(wallet.sign(
                ledger.program_id(),
                Instruction::CreateRootIdentity { privacy_level: 2 },
            ))
            .await
            .unwrap();

        for expected in [
            Commitment::Processed,
            Commitment::Processed,
            Commitment::Confirmed,
        ] {
            let status = ledger.signature_status(&signature).await.unwrap();
            assert_eq!(status, Some(expected));
        }
        assert_eq!(
            ledger
                .signature_status(&TxSignature([0u8; 64]))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_rejects_forged_signer() {
        let wallet = Wallet::generate();
        let ledger = funded_ledger(&wallet).await;

        let mut tx = wallet.sign(
            ledger.program_id(),
            Instruction::CreateRootIdentity { privacy_level: 0 },
        );
        tx.signer = Wallet::generate().address();

        assert!(matches!(ledger.submit(tx).await, Err(SubmitError::Rpc(_))));
    }

    #[tokio::test]
    async fn test_history_is_retained() {
        let wallet = Wallet::generate();
        let ledger = funded_ledger(&wallet).await;
        let program = ledger.program_id();

        let root = ledger
            .submit(wallet.sign(program, Instruction::CreateRootIdentity { privacy_level: 0 }))
            .await
            .unwrap();
        for index in 0..3 {
            ledger
                .submit(wallet.sign(program, create_context(index)))
                .await
                .unwrap();
        }

        assert_eq!(ledger.events().await.len(), 4);
        assert_eq!(
            ledger.signature_status(&root).await.unwrap(),
            Some(Commitment::Confirmed)
        );
    }
}

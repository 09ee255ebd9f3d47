//! Identity lifecycle
//!
//! Per owner: `NoRoot -> RootActive`. Per context:
//! `Unprovisioned -> Active -> Revoked` (terminal).
//!
//! The in-flight flag only stops this instance from overlapping two
//! mutations for the same owner. Other instances can still race on a context
//! index; the ledger rejects the loser, and `create_context` re-reads the
//! root and retries up to `context_index_retries` times.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument, warn};

use crate::error::{
    LifecycleError, NetworkError, PrismError, PrismResult, ProgramErrorCode, ValidationError,
};
use crate::services::derivation::AddressDeriver;
use crate::services::ledger::{
    await_confirmation, classify_submit_error, ConfirmPolicy, Instruction, LedgerClient,
};
use crate::services::wallet::Wallet;
use crate::types::{
    AccountData, Address, ContextIdentity, ContextType, PrivacyLevel, RootIdentity, TxSignature,
};

/// Lifecycle tuning
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Commitment polling after each submission
    pub confirm: ConfirmPolicy,
    /// Re-read-and-retry rounds after a context index conflict
    pub context_index_retries: u32,
    /// Privacy level used when `create_context` provisions a missing root
    pub default_privacy_level: PrivacyLevel,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            confirm: ConfirmPolicy::default(),
            context_index_retries: 2,
            default_privacy_level: PrivacyLevel::Maximum,
        }
    }
}

/// Clears the owner's in-flight flag on drop
struct InFlightGuard<'a> {
    owners: &'a Mutex<HashSet<Address>>,
    owner: Address,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
        owners.remove(&self.owner);
    }
}

/// Creates, provisions and revokes root and context identities
pub struct IdentityLifecycle {
    ledger: Arc<dyn LedgerClient>,
    deriver: AddressDeriver,
    wallets: HashMap<Address, Wallet>,
    config: LifecycleConfig,
    in_flight: Mutex<HashSet<Address>>,
}

impl IdentityLifecycle {
    pub fn new(ledger: Arc<dyn LedgerClient>, deriver: AddressDeriver) -> Self {
        Self {
            ledger,
            deriver,
            wallets: HashMap::new(),
            config: LifecycleConfig::default(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Register a signing wallet; its address becomes a manageable owner
    pub fn with_wallet(mut self, wallet: Wallet) -> Self {
        self.wallets.insert(wallet.address(), wallet);
        self
    }

    pub fn with_config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    /// Owners this instance can sign for
    pub fn owners(&self) -> Vec<Address> {
        self.wallets.keys().copied().collect()
    }

    pub fn root_address(&self, owner: &Address) -> PrismResult<(Address, u8)> {
        Ok(self.deriver.derive_root(owner)?)
    }

    pub fn context_address(&self, owner: &Address, context_index: u16) -> PrismResult<(Address, u8)> {
        let (root, _) = self.root_address(owner)?;
        Ok(self.deriver.derive_context(&root, context_index)?)
    }

    // ==================== Reads ====================

    /// Root identity of `owner`, `None` if not provisioned
    pub async fn fetch_root(&self, owner: &Address) -> PrismResult<Option<RootIdentity>> {
        let (address, _) = self.root_address(owner)?;
        self.fetch_account(&address).await
    }

    /// Context `context_index` of `owner`'s root, `None` if absent
    pub async fn fetch_context(
        &self,
        owner: &Address,
        context_index: u16,
    ) -> PrismResult<Option<ContextIdentity>> {
        let (address, _) = self.context_address(owner, context_index)?;
        self.fetch_account(&address).await
    }

    async fn fetch_account<T: AccountData>(&self, address: &Address) -> PrismResult<Option<T>> {
        match self.ledger.fetch_account(address).await? {
            Some(bytes) => Ok(Some(T::from_account_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read-only check that `amount` may be spent through a context
    pub async fn check_spending_limit(
        &self,
        owner: &Address,
        context_index: u16,
        amount: u64,
    ) -> PrismResult<()> {
        let context = self
            .fetch_context(owner, context_index)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        Self::check_limit(&context, amount)
    }

    fn check_limit(context: &ContextIdentity, amount: u64) -> PrismResult<()> {
        if context.revoked {
            return Err(LifecycleError::ContextRevoked.into());
        }
        if amount > context.max_per_transaction {
            return Err(LifecycleError::ExceedsTransactionLimit.into());
        }
        Ok(())
    }

    // ==================== Mutations ====================

    /// Return the owner's root identity, creating it if absent
    ///
    /// Losing a creation race to another client is not an error: the
    /// existing record is re-fetched and returned.
    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn ensure_root(&self, owner: &Address, privacy_level: u8) -> PrismResult<RootIdentity> {
        let privacy_level = PrivacyLevel::try_from(privacy_level)?;
        let wallet = self.wallet(owner)?;
        let _guard = self.begin_mutation(owner)?;

        self.ensure_root_locked(wallet, privacy_level).await
    }

    async fn ensure_root_locked(
        &self,
        wallet: &Wallet,
        privacy_level: PrivacyLevel,
    ) -> PrismResult<RootIdentity> {
        let owner = wallet.address();
        let (address, _) = self.root_address(&owner)?;

        if let Some(root) = self.fetch_account::<RootIdentity>(&address).await? {
            debug!(root = %address, "Root identity already provisioned");
            return Ok(root);
        }

        let instruction = Instruction::CreateRootIdentity {
            privacy_level: privacy_level as u8,
        };
        match self.submit_and_confirm(wallet, instruction).await {
            Ok(signature) => {
                info!(root = %address, %signature, ?privacy_level, "Root identity created");
            }
            Err(PrismError::Lifecycle(LifecycleError::AlreadyExists)) => {
                info!(root = %address, "Root identity created concurrently, re-fetching");
            }
            Err(e) => return Err(e),
        }

        self.fetch_account(&address)
            .await?
            .ok_or_else(|| LifecycleError::NotFound.into())
    }

    /// Create the next context under the owner's root, provisioning the root
    /// first if needed
    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn create_context(
        &self,
        owner: &Address,
        context_type: u8,
        max_per_transaction: u64,
    ) -> PrismResult<ContextIdentity> {
        let context_type = ContextType::try_from(context_type)?;
        let wallet = self.wallet(owner)?;
        let _guard = self.begin_mutation(owner)?;

        let (root_address, _) = self.root_address(owner)?;
        let mut root = self
            .ensure_root_locked(wallet, self.config.default_privacy_level)
            .await?;
        let mut attempt = 0;

        loop {
            let context_index = u16::try_from(root.context_count)
                .map_err(|_| ValidationError::ContextIndexOverflow(root.context_count))?;
            let (context_address, _) = self.deriver.derive_context(&root_address, context_index)?;

            let instruction = Instruction::CreateContext {
                context_type: context_type as u8,
                max_per_transaction,
                context_index,
            };
            match self.submit_and_confirm(wallet, instruction).await {
                Ok(signature) => {
                    info!(
                        root = %root_address,
                        context = %context_address,
                        context_index,
                        %signature,
                        "Context identity created"
                    );
                    return self
                        .fetch_account(&context_address)
                        .await?
                        .ok_or_else(|| LifecycleError::NotFound.into());
                }
                Err(e) if Self::is_index_conflict(&e) => {
                    if attempt >= self.config.context_index_retries {
                        warn!(context_index, attempt, "Context index conflict, giving up");
                        return Err(LifecycleError::IndexConflict {
                            expected: context_index,
                        }
                        .into());
                    }
                    attempt += 1;
                    warn!(context_index, attempt, "Context index conflict, re-reading root");
                    root = self
                        .fetch_account(&root_address)
                        .await?
                        .ok_or(LifecycleError::NotFound)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn is_index_conflict(error: &PrismError) -> bool {
        matches!(
            error,
            PrismError::Lifecycle(LifecycleError::AlreadyExists)
                | PrismError::Network(NetworkError::ProgramRejected {
                    reason: Some(ProgramErrorCode::IndexConflict),
                    ..
                })
        )
    }

    /// Permanently revoke an active context
    ///
    /// Revoking twice fails with `AlreadyRevoked`.
    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn revoke_context(
        &self,
        owner: &Address,
        context_index: u16,
    ) -> PrismResult<ContextIdentity> {
        let wallet = self.wallet(owner)?;
        let _guard = self.begin_mutation(owner)?;

        let (address, _) = self.context_address(owner, context_index)?;
        let context: ContextIdentity = self
            .fetch_account(&address)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        if context.revoked {
            return Err(LifecycleError::AlreadyRevoked.into());
        }

        let signature = self
            .submit_and_confirm(wallet, Instruction::RevokeContext { context_index })
            .await?;
        info!(context = %address, context_index, %signature, "Context identity revoked");

        self.fetch_account(&address)
            .await?
            .ok_or_else(|| LifecycleError::NotFound.into())
    }

    /// Record `amount` spent through a context
    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn record_spending(
        &self,
        owner: &Address,
        context_index: u16,
        amount: u64,
    ) -> PrismResult<ContextIdentity> {
        let wallet = self.wallet(owner)?;
        let _guard = self.begin_mutation(owner)?;

        let (address, _) = self.context_address(owner, context_index)?;
        let context: ContextIdentity = self
            .fetch_account(&address)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        Self::check_limit(&context, amount)?;
        if context.total_spent.checked_add(amount).is_none() {
            return Err(LifecycleError::SpendingOverflow.into());
        }

        let signature = self
            .submit_and_confirm(
                wallet,
                Instruction::RecordSpending {
                    context_index,
                    amount,
                },
            )
            .await?;
        info!(context = %address, context_index, amount, %signature, "Spending recorded");

        self.fetch_account(&address)
            .await?
            .ok_or_else(|| LifecycleError::NotFound.into())
    }

    /// Change the privacy level of an existing root
    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn update_privacy_level(
        &self,
        owner: &Address,
        new_privacy_level: u8,
    ) -> PrismResult<RootIdentity> {
        let new_level = PrivacyLevel::try_from(new_privacy_level)?;
        let wallet = self.wallet(owner)?;
        let _guard = self.begin_mutation(owner)?;

        let (address, _) = self.root_address(owner)?;
        if self.fetch_account::<RootIdentity>(&address).await?.is_none() {
            return Err(LifecycleError::NotFound.into());
        }

        let signature = self
            .submit_and_confirm(
                wallet,
                Instruction::UpdatePrivacyLevel {
                    new_privacy_level: new_level as u8,
                },
            )
            .await?;
        info!(root = %address, ?new_level, %signature, "Privacy level updated");

        self.fetch_account(&address)
            .await?
            .ok_or_else(|| LifecycleError::NotFound.into())
    }

    // ==================== Internals ====================

    fn wallet(&self, owner: &Address) -> PrismResult<&Wallet> {
        self.wallets
            .get(owner)
            .ok_or_else(|| NetworkError::WalletNotReady(owner.to_string()).into())
    }

    fn begin_mutation(&self, owner: &Address) -> PrismResult<InFlightGuard<'_>> {
        let mut owners = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !owners.insert(*owner) {
            return Err(LifecycleError::MutationInFlight.into());
        }
        Ok(InFlightGuard {
            owners: &self.in_flight,
            owner: *owner,
        })
    }

    async fn submit_and_confirm(
        &self,
        wallet: &Wallet,
        instruction: Instruction,
    ) -> PrismResult<TxSignature> {
        let transaction = wallet.sign(self.deriver.program_id(), instruction);
        let signature = self
            .ledger
            .submit(transaction)
            .await
            .map_err(classify_submit_error)?;
        await_confirmation(self.ledger.as_ref(), &signature, &self.config.confirm).await?;
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::derivation::default_program_id;
    use crate::services::ledger::MemoryLedger;
    use std::time::Duration;

    fn fast_config() -> LifecycleConfig {
        LifecycleConfig {
            confirm: ConfirmPolicy {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
                max_attempts: 5,
            },
            ..Default::default()
        }
    }

    async fn setup() -> (Arc<MemoryLedger>, IdentityLifecycle, Address) {
        let ledger = Arc::new(MemoryLedger::new(default_program_id()));
        let wallet = Wallet::generate();
        let owner = wallet.address();
        ledger.airdrop(owner, 1_000_000_000).await;

        let lifecycle = IdentityLifecycle::new(ledger.clone(), AddressDeriver::default())
            .with_wallet(wallet)
            .with_config(fast_config());
        (ledger, lifecycle, owner)
    }

    #[tokio::test]
    async fn test_ensure_root_is_idempotent() {
        let (_, lifecycle, owner) = setup().await;

        assert!(lifecycle.fetch_root(&owner).await.unwrap().is_none());
        let first = lifecycle.ensure_root(&owner, 1).await.unwrap();
        let second = lifecycle.ensure_root(&owner, 3).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.context_count, 0);
        assert_eq!(second.privacy_level, PrivacyLevel::High);
        assert_eq!(second.owner, owner);
    }

    #[tokio::test]
    async fn test_create_context_provisions_root() {
        let (_, lifecycle, owner) = setup().await;

        let context = lifecycle.create_context(&owner, 2, 500).await.unwrap();
        let root = lifecycle.fetch_root(&owner).await.unwrap().unwrap();

        assert_eq!(context.context_index, 0);
        assert_eq!(context.context_type, ContextType::Gaming);
        assert_eq!(root.context_count, 1);
        assert_eq!(root.privacy_level, PrivacyLevel::Maximum);
        assert_eq!(context.root_identity, lifecycle.root_address(&owner).unwrap().0);
    }

    #[tokio::test]
    async fn test_validation_happens_before_io() {
        let (ledger, lifecycle, owner) = setup().await;

        assert_eq!(
            lifecycle.ensure_root(&owner, 5).await.unwrap_err(),
            PrismError::Validation(ValidationError::InvalidPrivacyLevel(5))
        );
        assert_eq!(
            lifecycle.create_context(&owner, 6, 1).await.unwrap_err(),
            PrismError::Validation(ValidationError::InvalidContextType(6))
        );
        assert!(ledger.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_wallet_fails_before_submission() {
        let (ledger, lifecycle, _) = setup().await;
        let stranger = Wallet::generate().address();

        let err = lifecycle.ensure_root(&stranger, 1).await.unwrap_err();
        assert!(matches!(
            err,
            PrismError::Network(NetworkError::WalletNotReady(_))
        ));
        assert!(ledger.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_revoke_twice_fails() {
        let (_, lifecycle, owner) = setup().await;
        lifecycle.create_context(&owner, 0, 100).await.unwrap();

        let revoked = lifecycle.revoke_context(&owner, 0).await.unwrap();
        assert!(revoked.revoked);

        assert_eq!(
            lifecycle.revoke_context(&owner, 0).await.unwrap_err(),
            PrismError::Lifecycle(LifecycleError::AlreadyRevoked)
        );
        assert_eq!(
            lifecycle.revoke_context(&owner, 7).await.unwrap_err(),
            PrismError::Lifecycle(LifecycleError::NotFound)
        );
        assert!(lifecycle.fetch_context(&owner, 0).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_spending_limits() {
        let (_, lifecycle, owner) = setup().await;
        lifecycle.create_context(&owner, 0, 100).await.unwrap();

        lifecycle.check_spending_limit(&owner, 0, 100).await.unwrap();
        assert_eq!(
            lifecycle.check_spending_limit(&owner, 0, 101).await.unwrap_err(),
            PrismError::Lifecycle(LifecycleError::ExceedsTransactionLimit)
        );

        lifecycle.record_spending(&owner, 0, 60).await.unwrap();
        let context = lifecycle.record_spending(&owner, 0, 40).await.unwrap();
        assert_eq!(context.total_spent, 100);

        lifecycle.revoke_context(&owner, 0).await.unwrap();
        assert_eq!(
            lifecycle.record_spending(&owner, 0, 1).await.unwrap_err(),
            PrismError::Lifecycle(LifecycleError::ContextRevoked)
        );
    }

    #[tokio::test]
    async fn test_update_privacy_level() {
        let (_, lifecycle, owner) = setup().await;

        assert_eq!(
            lifecycle.update_privacy_level(&owner, 2).await.unwrap_err(),
            PrismError::Lifecycle(LifecycleError::NotFound)
        );

        lifecycle.ensure_root(&owner, 0).await.unwrap();
        let root = lifecycle.update_privacy_level(&owner, 4).await.unwrap();
        assert_eq!(root.privacy_level, PrivacyLevel::Public);
    }

    #[tokio::test]
    async fn test_in_flight_flag_rejects_overlap() {
        let (_, lifecycle, owner) = setup().await;

        let guard = lifecycle.begin_mutation(&owner).unwrap();
        assert_eq!(
            lifecycle.ensure_root(&owner, 1).await.unwrap_err(),
            PrismError::Lifecycle(LifecycleError::MutationInFlight)
        );
        drop(guard);

        assert!(lifecycle.ensure_root(&owner, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_confirmation_timeout_is_reported() {
        let ledger = Arc::new(MemoryLedger::new(default_program_id()).with_confirmation_lag(100));
        let wallet = Wallet::generate();
        let owner = wallet.address();
        ledger.airdrop(owner, 1_000_000_000).await;
        let lifecycle = IdentityLifecycle::new(ledger.clone(), AddressDeriver::default())
            .with_wallet(wallet)
            .with_config(fast_config());

        let err = lifecycle.ensure_root(&owner, 1).await.unwrap_err();
        assert!(matches!(
            err,
            PrismError::Network(NetworkError::ConfirmationTimeout { attempts: 5, .. })
        ));

        // Inconclusive: the root did land
        assert!(lifecycle.fetch_root(&owner).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_no_partial_state() {
        let ledger = Arc::new(MemoryLedger::new(default_program_id()));
        let wallet = Wallet::generate();
        let owner = wallet.address();
        ledger
            .airdrop(owner, ledger.rent_for(RootIdentity::SIZE))
            .await;
        let lifecycle = IdentityLifecycle::new(ledger.clone(), AddressDeriver::default())
            .with_wallet(wallet)
            .with_config(fast_config());

        let err = lifecycle.create_context(&owner, 0, 10).await.unwrap_err();
        assert_eq!(err, PrismError::Network(NetworkError::InsufficientFunds));

        let root = lifecycle.fetch_root(&owner).await.unwrap().unwrap();
        assert_eq!(root.context_count, 0);
        assert!(lifecycle.fetch_context(&owner, 0).await.unwrap().is_none());
    }
}

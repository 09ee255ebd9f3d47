//! Wallet signing
//!
//! Holds the owner's Ed25519 key and signs program instructions.

use ed25519_dalek::{Signer, SigningKey};

use crate::error::NetworkError;
use crate::services::ledger::{Instruction, Transaction};
use crate::types::{Address, TxSignature};

/// Owner signing capability
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
}

impl Wallet {
    pub fn new(secret_key_bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret_key_bytes),
        }
    }

    /// Random key, for development and tests
    pub fn generate() -> Self {
        let key: [u8; 32] = rand::random();
        Self::new(&key)
    }

    /// Load from a hex-encoded 32-byte secret
    pub fn from_hex(secret_hex: &str) -> Result<Self, NetworkError> {
        let secret_bytes: [u8; 32] = hex::decode(secret_hex.trim_start_matches("0x"))
            .map_err(|e| NetworkError::WalletNotReady(format!("invalid secret key hex: {e}")))?
            .try_into()
            .map_err(|_| NetworkError::WalletNotReady("secret key must be 32 bytes".into()))?;

        Ok(Self::new(&secret_bytes))
    }

    pub fn address(&self) -> Address {
        Address::from_verifying_key(&self.signing_key.verifying_key())
    }

    /// Sign an instruction for `program_id`
    pub fn sign(&self, program_id: Address, instruction: Instruction) -> Transaction {
        let signer = self.address();
        let nonce: u64 = rand::random();
        let message = Transaction::message(&program_id, &signer, nonce, &instruction);
        let signature = self.signing_key.sign(&message);

        Transaction {
            program_id,
            signer,
            nonce,
            instruction,
            signature: TxSignature(signature.to_bytes()),
        }
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

//! Deterministic address derivation
//!
//! An address is `sha256(seeds || nonce || program_id || marker)` for the
//! first nonce, counting down from 255, whose hash is not a valid ed25519
//! point. Off-curve addresses have no private key, so no wallet can ever sign
//! for them.

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha256};

use crate::error::DerivationError;
use crate::types::Address;

/// Namespace tag for root identities
pub const ROOT_SEED: &[u8] = b"root";
/// Namespace tag for context identities
pub const CONTEXT_SEED: &[u8] = b"context";

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Program id used when none is configured
pub fn default_program_id() -> Address {
    Address::new(Sha256::digest(b"prism:identity-program:v1").into())
}

/// Whether the bytes decode to a point on the ed25519 curve
pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    CompressedEdwardsY(*bytes).decompress().is_some()
}

/// Derives root and context addresses under one program id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDeriver {
    program_id: Address,
}

impl AddressDeriver {
    pub fn new(program_id: Address) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> Address {
        self.program_id
    }

    /// Address and nonce of the root identity owned by `owner`
    pub fn derive_root(&self, owner: &Address) -> Result<(Address, u8), DerivationError> {
        self.find_address(&[ROOT_SEED, owner.as_bytes()])
    }

    /// Address and nonce of context `index` under `root`
    pub fn derive_context(
        &self,
        root: &Address,
        index: u16,
    ) -> Result<(Address, u8), DerivationError> {
        self.find_address(&[CONTEXT_SEED, root.as_bytes(), &index.to_le_bytes()])
    }

    /// Candidate address for an explicit nonce, `None` if it lands on the curve
    pub fn create_address(&self, seeds: &[&[u8]], nonce: u8) -> Option<Address> {
        let mut hasher = Sha256::new();
        for seed in seeds {
            hasher.update(seed);
        }
        hasher.update([nonce]);
        hasher.update(self.program_id.as_bytes());
        hasher.update(PDA_MARKER);
        let bytes: [u8; 32] = hasher.finalize().into();

        if is_on_curve(&bytes) {
            None
        } else {
            Some(Address::new(bytes))
        }
    }

    fn find_address(&self, seeds: &[&[u8]]) -> Result<(Address, u8), DerivationError> {
        (1..=u8::MAX)
            .rev()
            .find_map(|nonce| {
                self.create_address(seeds, nonce)
                    .map(|address| (address, nonce))
            })
            .ok_or(DerivationError::NoViableNonce)
    }
}

impl Default for AddressDeriver {
    fn default() -> Self {
        Self::new(default_program_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_root_derivation_is_deterministic() {
        let deriver = AddressDeriver::default();
        let owner = Address::new([9u8; 32]);

        let first = deriver.derive_root(&owner).unwrap();
        let second = deriver.derive_root(&owner).unwrap();

        assert_eq!(first, second);
        assert!(!is_on_curve(first.0.as_bytes()));
    }

    #[test]
    fn test_context_indices_never_collide() {
        let deriver = AddressDeriver::default();
        let (root, _) = deriver.derive_root(&Address::new([3u8; 32])).unwrap();

        let addresses: HashSet<Address> = (0..64u16)
            .map(|i| deriver.derive_context(&root, i).unwrap().0)
            .collect();

        assert_eq!(addresses.len(), 64);
    }

    #[test]
    fn test_nonce_is_first_off_curve_candidate() {
        let deriver = AddressDeriver::default();
        let owner = Address::new([5u8; 32]);
        let (address, nonce) = deriver.derive_root(&owner).unwrap();

        let seeds: [&[u8]; 2] = [ROOT_SEED, owner.as_bytes()];
        for higher in u16::from(nonce) + 1..=u16::from(u8::MAX) {
            assert!(deriver.create_address(&seeds, higher as u8).is_none());
        }
        assert_eq!(deriver.create_address(&seeds, nonce), Some(address));
    }

    #[test]
    fn test_program_id_namespaces_addresses() {
        let owner = Address::new([1u8; 32]);
        let a = AddressDeriver::default().derive_root(&owner).unwrap().0;
        let b = AddressDeriver::new(Address::new([2u8; 32]))
            .derive_root(&owner)
            .unwrap()
            .0;

        assert_ne!(a, b);
    }

    #[test]
    fn test_wallet_keys_are_on_curve() {
        let key = ed25519_dalek::SigningKey::from_bytes(&[11u8; 32]);
        assert!(is_on_curve(&key.verifying_key().to_bytes()));
    }
}

//! Identity account types and their ledger encoding

use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{NetworkError, ValidationError};

/// 32-byte ledger address (wallet key, program id or derived address)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| ValidationError::InvalidAddress(format!("{s}: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ValidationError::InvalidAddress(format!("{s}: expected 32 bytes")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Root identity privacy level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
#[borsh(use_discriminant = true)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PrivacyLevel {
    /// Full anonymity
    Maximum = 0,
    /// Minimal disclosure
    High = 1,
    Medium = 2,
    Low = 3,
    /// Fully public
    Public = 4,
}

impl TryFrom<u8> for PrivacyLevel {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PrivacyLevel::Maximum),
            1 => Ok(PrivacyLevel::High),
            2 => Ok(PrivacyLevel::Medium),
            3 => Ok(PrivacyLevel::Low),
            4 => Ok(PrivacyLevel::Public),
            other => Err(ValidationError::InvalidPrivacyLevel(other)),
        }
    }
}

/// Category of use for a context identity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
#[borsh(use_discriminant = true)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ContextType {
    /// Dark pool trading, swaps
    DeFi = 0,
    Social = 1,
    Gaming = 2,
    Professional = 3,
    /// Burned after use
    Temporary = 4,
    Public = 5,
}

impl TryFrom<u8> for ContextType {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ContextType::DeFi),
            1 => Ok(ContextType::Social),
            2 => Ok(ContextType::Gaming),
            3 => Ok(ContextType::Professional),
            4 => Ok(ContextType::Temporary),
            5 => Ok(ContextType::Public),
            other => Err(ValidationError::InvalidContextType(other)),
        }
    }
}

/// Account records stored on the ledger as `discriminator || borsh(record)`
pub trait AccountData: BorshSerialize + BorshDeserialize + Sized {
    /// Account type name, hashed into the discriminator
    const NAME: &'static str;

    /// Space the ledger allocates for the account, discriminator included
    const SIZE: usize;

    fn discriminator() -> [u8; 8] {
        let hash = Sha256::digest(format!("account:{}", Self::NAME).as_bytes());
        let mut out = [0u8; 8];
        out.copy_from_slice(&hash[..8]);
        out
    }

    fn to_account_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        bytes.extend_from_slice(&Self::discriminator());
        // Writing into a Vec cannot fail
        let _ = borsh::to_writer(&mut bytes, self);
        bytes
    }

    fn from_account_bytes(bytes: &[u8]) -> Result<Self, NetworkError> {
        if bytes.len() < 8 || bytes[..8] != Self::discriminator() {
            return Err(NetworkError::MalformedAccount(format!(
                "{}: discriminator mismatch",
                Self::NAME
            )));
        }
        borsh::from_slice(&bytes[8..])
            .map_err(|e| NetworkError::MalformedAccount(format!("{}: {e}", Self::NAME)))
    }
}

/// Top-level identity, one per owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RootIdentity {
    /// Wallet that owns this identity
    pub owner: Address,
    /// Unix timestamp
    pub created_at: i64,
    pub privacy_level: PrivacyLevel,
    /// Number of contexts created; also the next context index
    pub context_count: u32,
    /// Derivation nonce of the root address
    pub derivation_nonce: u8,
}

impl AccountData for RootIdentity {
    const NAME: &'static str = "RootIdentity";
    const SIZE: usize = 8 + 32 + 8 + 1 + 4 + 1;
}

/// Bounded, revocable child identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ContextIdentity {
    /// Address of the parent root identity
    pub root_identity: Address,
    pub context_type: ContextType,
    pub created_at: i64,
    /// Spending cap per transaction, in native units
    pub max_per_transaction: u64,
    pub total_spent: u64,
    /// One-way flag
    pub revoked: bool,
    pub context_index: u16,
    pub derivation_nonce: u8,
}

impl AccountData for ContextIdentity {
    const NAME: &'static str = "ContextIdentity";
    const SIZE: usize = 8 + 32 + 1 + 8 + 8 + 8 + 1 + 2 + 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_root() -> RootIdentity {
        RootIdentity {
            owner: Address::new([7u8; 32]),
            created_at: 1_700_000_000,
            privacy_level: PrivacyLevel::High,
            context_count: 3,
            derivation_nonce: 254,
        }
    }

    #[test]
    fn test_account_layout_sizes() {
        let root = sample_root();
        assert_eq!(root.to_account_bytes().len(), RootIdentity::SIZE);

        let context = ContextIdentity {
            root_identity: Address::new([1u8; 32]),
            context_type: ContextType::Gaming,
            created_at: 1_700_000_000,
            max_per_transaction: 50,
            total_spent: 0,
            revoked: false,
            context_index: 2,
            derivation_nonce: 255,
        };
        assert_eq!(context.to_account_bytes().len(), ContextIdentity::SIZE);
    }

    #[test]
    fn test_account_rejects_wrong_discriminator() {
        let bytes = sample_root().to_account_bytes();
        let err = ContextIdentity::from_account_bytes(&bytes).unwrap_err();
        assert!(matches!(err, NetworkError::MalformedAccount(_)));
        assert_eq!(RootIdentity::from_account_bytes(&bytes).unwrap(), sample_root());
    }

    #[test]
    fn test_enum_bounds() {
        assert_eq!(PrivacyLevel::try_from(4).unwrap(), PrivacyLevel::Public);
        assert_eq!(
            PrivacyLevel::try_from(5),
            Err(ValidationError::InvalidPrivacyLevel(5))
        );
        assert_eq!(ContextType::try_from(5).unwrap(), ContextType::Public);
        assert_eq!(
            ContextType::try_from(6),
            Err(ValidationError::InvalidContextType(6))
        );
    }

    #[test]
    fn test_address_hex() {
        let addr = Address::new([0xab; 32]);
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
        assert!("abcd".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_json_is_hex_string() {
        let addr = Address::new([0x11; 32]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", hex::encode([0x11u8; 32])));

        let decoded: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, addr);
        assert!(serde_json::from_str::<Address>("\"zz\"").is_err());
    }
}

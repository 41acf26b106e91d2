//! Ledger primitives: addresses, amounts, migration variants.
//!
//! `Address` is a 20-byte account identity. Its canonical text form is the
//! EIP-55 mixed-case checksum; parsing accepts any case, so two spellings of
//! the same account always compare equal.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ════════════════════════════════════════════════════════════════════════════
// ADDRESS
// ════════════════════════════════════════════════════════════════════════════

/// Error returned when an address string cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid hex in address: {0}")]
    InvalidHex(String),

    #[error("invalid address length: expected 20 bytes, got {0}")]
    InvalidLength(usize),
}

/// 20-byte account or contract identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn as_bytes(&self) -> &[u8; 20] { &self.0 }

    /// Lowercase hex without prefix.
    pub fn to_hex(&self) -> String { hex::encode(self.0) }

    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        if bytes.len() != 20 {
            return Err(AddressError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Address(arr))
    }

    /// EIP-55 checksum form, `0x`-prefixed.
    ///
    /// A hex letter is uppercased when the matching nibble of
    /// Keccak-256(lowercase hex) is >= 8.
    pub fn to_checksum(&self) -> String {
        let lower = self.to_hex();
        let digest = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let byte = digest[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.to_checksum()).finish()
    }
}

impl FromStr for Address {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(s.trim())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where D: Deserializer<'de> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(de::Error::custom)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// AMOUNT
// ════════════════════════════════════════════════════════════════════════════

/// Amount in smallest units of whatever asset the context implies.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Amount(pub u128);

impl Amount {
    /// All-ones allowance, used as "unlimited".
    pub const MAX: Amount = Amount(u128::MAX);

    pub fn zero() -> Self { Amount(0) }
    pub fn as_u128(&self) -> u128 { self.0 }
    pub fn is_zero(&self) -> bool { self.0 == 0 }
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> { self.0.checked_add(rhs.0).map(Amount) }
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> { self.0.checked_sub(rhs.0).map(Amount) }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for Amount {
    fn from(v: u128) -> Self { Amount(v) }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_u128(self.0)
    }
}

/// Accepts integers of any width as well as decimal or `0x` hex strings.
/// TOML integers are signed 64-bit, so large values arrive as strings.
impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Amount, D::Error>
    where D: Deserializer<'de> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or a decimal/hex string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount(u128::from(v)))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
                Ok(Amount(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                u128::try_from(v)
                    .map(Amount)
                    .map_err(|_| E::custom(format!("negative amount: {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                let v = v.trim();
                let parsed = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
                    Some(hex_digits) => u128::from_str_radix(hex_digits, 16),
                    None => v.replace('_', "").parse::<u128>(),
                };
                parsed
                    .map(Amount)
                    .map_err(|e| E::custom(format!("invalid amount '{}': {}", v, e)))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MIGRATION VARIANTS
// ════════════════════════════════════════════════════════════════════════════

/// Execution variant of a single migration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Cheaper path; accepts a fixed 9 bp value loss.
    GasOptimized,
    /// Value-preserving path; more expensive.
    Safe,
}

impl MigrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationMode::GasOptimized => "gas_optimized",
            MigrationMode::Safe => "safe",
        }
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Migrator contract family. Families differ in the callable forms they
/// expose and in the structural shape of their receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContractFamily {
    /// Generic ledger migrator; offers both modes.
    #[default]
    Generic,
    /// Wrapped-asset migrator; a single callable form.
    WrappedAsset,
}

impl ContractFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractFamily::Generic => "generic",
            ContractFamily::WrappedAsset => "wrapped_asset",
        }
    }
}

impl fmt::Display for ContractFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use crate::CoreError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub use rnr_crypto::Hash;

/// Address prefix for the Route-N-Root chain
pub const ADDRESS_PREFIX: &str = "rnr";

/// 20-byte account/validator address, rendered as "rnr" + 40 lowercase hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn try_from_slice(slice: &[u8]) -> crate::Result<Self> {
        let bytes: [u8; 20] = slice
            .try_into()
            .map_err(|_| CoreError::InvalidAddress(format!("expected 20 bytes, got {}", slice.len())))?;
        Ok(Self(bytes))
    }

    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(rnr_crypto::address_from_public_key(public_key))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn zero() -> Self {
        Self([0u8; 20])
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ADDRESS_PREFIX, hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or_else(|| CoreError::InvalidAddress(format!("missing '{ADDRESS_PREFIX}' prefix: {s}")))?;
        if body.len() != 40 {
            return Err(CoreError::InvalidAddress(format!(
                "expected 40 hex chars after prefix, got {}",
                body.len()
            )));
        }
        if body.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(CoreError::InvalidAddress("address hex must be lowercase".to_string()));
        }
        let bytes = hex::decode(body)
            .map_err(|e| CoreError::InvalidAddress(format!("invalid hex: {e}")))?;
        Self::try_from_slice(&bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

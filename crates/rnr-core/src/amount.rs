use crate::CoreError;
use num_bigint::BigUint;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign};

/// Token amount with arbitrary precision.
///
/// Amounts routinely exceed the 64-bit range (entry fees and rewards carry a
/// 1e8 precision scale), so they are backed by `BigUint` and serialized as
/// decimal strings at every external boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(BigUint);

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::from(0u64))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    pub fn from_u128(value: u128) -> Self {
        Self(BigUint::from(value))
    }

    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    /// Parse a base-10 decimal string
    pub fn parse_decimal(s: &str) -> crate::Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidAmount(format!("not a decimal string: {s:?}")));
        }
        let value = BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| CoreError::InvalidAmount(format!("unparseable: {s:?}")))?;
        Ok(Self(value))
    }

    pub fn to_decimal_string(&self) -> String {
        self.0.to_str_radix(10)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::from(0u64)
    }

    pub fn inner(&self) -> &BigUint {
        &self.0
    }

    /// Subtraction that fails instead of wrapping below zero
    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.0 >= other.0 {
            Some(Amount(&self.0 - &other.0))
        } else {
            None
        }
    }

    pub fn mul_u64(&self, factor: u64) -> Amount {
        Amount(&self.0 * BigUint::from(factor))
    }

    /// Integer division; the remainder is dropped (burned by callers)
    pub fn div_u64(&self, divisor: u64) -> Amount {
        if divisor == 0 {
            return Amount::zero();
        }
        Amount(&self.0 / BigUint::from(divisor))
    }

    /// `self * pct / 100`
    pub fn percent(&self, pct: u64) -> Amount {
        self.mul_u64(pct).div_u64(100)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl Add<&Amount> for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::parse_decimal(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let amount = Amount::parse_decimal("123456789012345678901234567890").unwrap();
        assert_eq!(amount.to_decimal_string(), "123456789012345678901234567890");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Amount::parse_decimal("").is_err());
        assert!(Amount::parse_decimal("-5").is_err());
        assert!(Amount::parse_decimal("12a").is_err());
        assert!(Amount::parse_decimal("1.5").is_err());
    }

    #[test]
    fn test_checked_sub() {
        let a = Amount::from_u64(100);
        let b = Amount::from_u64(40);
        assert_eq!(a.checked_sub(&b).unwrap(), Amount::from_u64(60));
        assert!(b.checked_sub(&a).is_none());
    }

    #[test]
    fn test_percent_split() {
        let total = Amount::from_u64(1000);
        assert_eq!(total.percent(80), Amount::from_u64(800));
        assert_eq!(total.percent(20), Amount::from_u64(200));
    }

    #[test]
    fn test_div_drops_remainder() {
        let total = Amount::from_u64(10);
        assert_eq!(total.div_u64(3), Amount::from_u64(3));
        assert_eq!(total.div_u64(0), Amount::zero());
    }

    #[test]
    fn test_serde_decimal_string() {
        let amount = Amount::from_u128(u128::MAX);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, format!("\"{}\"", u128::MAX));
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }
}

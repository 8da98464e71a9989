//! Token Amounts
//!
//! On-chain balances are uint256, so amounts are arbitrary-precision:
//! [`Amount`] (`BigUint`) for snapshot values and [`Delta`] (`BigInt`) for the
//! signed difference between two snapshots. Comparisons are exact; there is no
//! tolerance anywhere in the verifier.

use crate::verifier::error::{VerifierError, VerifierResult};
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Signed, Zero};

/// Unsigned token amount (raw units, no decimals applied).
pub type Amount = BigUint;

/// Signed balance change: `after - before`.
pub type Delta = BigInt;

/// Parse a decimal (`"1000"`) or hex (`"0x3e8"`) amount.
pub fn parse_amount(value: &str) -> VerifierResult<Amount> {
    let trimmed = value.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if hex.is_empty() {
            Some(BigUint::zero())
        } else {
            BigUint::parse_bytes(hex.as_bytes(), 16)
        }
    } else {
        let digits: String = trimmed.chars().filter(|c| *c != '_').collect();
        BigUint::parse_bytes(digits.as_bytes(), 10)
    };
    parsed.ok_or_else(|| VerifierError::InvalidAmount {
        value: value.to_string(),
        reason: "not a decimal or 0x-hex unsigned integer".into(),
    })
}

/// Amount held in a 32-byte big-endian ABI word.
pub fn amount_from_word(word: &[u8; 32]) -> Amount {
    BigUint::from_bytes_be(word)
}

/// `after - before` as a signed delta.
pub fn signed_delta(before: &Amount, after: &Amount) -> Delta {
    BigInt::from_biguint(Sign::Plus, after.clone()) - BigInt::from_biguint(Sign::Plus, before.clone())
}

/// Widen an unsigned amount to a signed one.
pub fn to_signed(amount: &Amount) -> Delta {
    BigInt::from_biguint(Sign::Plus, amount.clone())
}

/// Magnitude of a delta.
pub fn magnitude(delta: &Delta) -> Amount {
    delta.abs().to_biguint().unwrap_or_default()
}

/// `+30`, `-12`, `0` rendering for report tables.
pub fn format_delta(delta: &Delta) -> String {
    if delta.is_positive() {
        format!("+{}", delta)
    } else {
        delta.to_string()
    }
}

/// Serde adapter: amounts as decimal strings (JSON numbers cannot hold uint256).
pub mod decimal {
    use super::{parse_amount, Amount};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &Amount, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&amount.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Amount, D::Error> {
        let raw = String::deserialize(d)?;
        parse_amount(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_and_hex() {
        assert_eq!(parse_amount("1000").unwrap(), BigUint::from(1000u32));
        assert_eq!(parse_amount("0x3e8").unwrap(), BigUint::from(1000u32));
        assert_eq!(parse_amount("1_000").unwrap(), BigUint::from(1000u32));
        assert!(parse_amount("-5").is_err());
        assert!(parse_amount("ten").is_err());
    }

    #[test]
    fn test_signed_delta_both_directions() {
        let a = BigUint::from(100u32);
        let b = BigUint::from(130u32);
        assert_eq!(signed_delta(&a, &b), BigInt::from(30));
        assert_eq!(signed_delta(&b, &a), BigInt::from(-30));
        assert_eq!(magnitude(&BigInt::from(-30)), BigUint::from(30u32));
        assert_eq!(format_delta(&BigInt::from(30)), "+30");
        assert_eq!(format_delta(&BigInt::from(-30)), "-30");
    }

    #[test]
    fn test_amount_from_word_big_endian() {
        let mut word = [0u8; 32];
        word[30] = 0x01;
        word[31] = 0x00;
        assert_eq!(amount_from_word(&word), BigUint::from(256u32));
    }
}

//! Account identifiers.
//!
//! Addresses are stored as lowercase `0x`-prefixed 40-hex-digit strings so that
//! comparisons between event payloads, accessor results and configuration are
//! case-insensitive.

use crate::verifier::error::{VerifierError, VerifierResult};
use serde::{Deserialize, Serialize};

/// Validated 20-byte account identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub const ZERO_HEX: &'static str = "0x0000000000000000000000000000000000000000";

    pub fn parse(value: &str) -> VerifierResult<Self> {
        let trimmed = value.trim();
        let Some(body) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        else {
            return Err(VerifierError::InvalidAddress {
                value: value.to_string(),
                reason: "missing 0x prefix".into(),
            });
        };
        if body.len() != 40 {
            return Err(VerifierError::InvalidAddress {
                value: value.to_string(),
                reason: format!("expected 40 hex digits, got {}", body.len()),
            });
        }
        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VerifierError::InvalidAddress {
                value: value.to_string(),
                reason: "non-hex character".into(),
            });
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    pub fn zero() -> Self {
        Self(Self::ZERO_HEX.to_string())
    }

    /// Address held in the low 20 bytes of a 32-byte ABI word.
    pub fn from_word(word: &[u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(&word[12..])))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO_HEX
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 40 hex digits without prefix.
    pub fn hex_body(&self) -> &str {
        &self.0[2..]
    }

    /// Left-padded 32-byte ABI encoding, hex without prefix.
    pub fn abi_word_hex(&self) -> String {
        format!("{:0>64}", self.hex_body())
    }

    /// `0x1234…abcd` form for tables.
    pub fn short(&self) -> String {
        format!("{}…{}", &self.0[..6], &self.0[38..])
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = VerifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = VerifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case() {
        let a = Address::parse("0x616e8BfA43F920657B3497DBf40D6b1A02D4608d").unwrap();
        let b = Address::parse("0x616e8bfa43f920657b3497dbf40d6b1a02d4608d").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.abi_word_hex().len(), 64);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Address::parse("616e8bfa43f920657b3497dbf40d6b1a02d4608d").is_err());
        assert!(Address::parse("0x616e").is_err());
        assert!(Address::parse("0xzz6e8bfa43f920657b3497dbf40d6b1a02d4608d").is_err());
    }

    #[test]
    fn test_from_word_takes_low_bytes() {
        let mut word = [0u8; 32];
        word[31] = 0x01;
        word[12] = 0xab;
        let a = Address::from_word(&word);
        assert_eq!(a.as_str(), "0xab00000000000000000000000000000000000001");
        assert!(Address::zero().is_zero());
    }
}

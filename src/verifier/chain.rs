//! Chain Read Seam
//!
//! The verifier never writes to the system under test. Everything it knows about
//! a deployment comes through [`ChainReader`]: the current block height and
//! batches of zero/one-argument view calls evaluated at one pinned block.
//!
//! A batch is the unit of consistency. Every call in a batch MUST be answered
//! from the same state version; implementations that cannot guarantee this
//! (e.g. by pinning a block number) are not valid readers.

use crate::verifier::address::Address;
use crate::verifier::error::{VerifierError, VerifierResult};
use sha3::{Digest, Keccak256};

/// One 32-byte ABI word.
pub type Word = [u8; 32];

/// Derive the 4-byte selector for a signature like `balanceOf(address)`.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Keccak-256 topic hash for an event signature, `0x`-prefixed hex.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
}

/// Signature for a method given by bare name or full signature.
///
/// `treasury` and `treasury()` both mean the zero-argument accessor; a method
/// that takes an address argument must be spelled out (`balanceOf(address)`).
pub fn normalize_signature(method: &str) -> String {
    let m = method.trim();
    if m.contains('(') {
        m.to_string()
    } else {
        format!("{}()", m)
    }
}

/// Parse a `0x` hex return payload and take its first word.
pub fn first_word(payload: &str) -> VerifierResult<Word> {
    let body = payload.trim().trim_start_matches("0x");
    let bytes = hex::decode(body).map_err(|e| VerifierError::SnapshotRead {
        call: "decode".into(),
        reason: format!("bad hex payload: {}", e),
    })?;
    if bytes.len() < 32 {
        return Err(VerifierError::SnapshotRead {
            call: "decode".into(),
            reason: format!("payload too short: {} bytes (call reverted or not a view)", bytes.len()),
        });
    }
    let mut word = [0u8; 32];
    word.copy_from_slice(&bytes[..32]);
    Ok(word)
}

// =============================================================================
// CONTRACT CALL
// =============================================================================

/// A view call: `target.method(args...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub target: Address,
    /// Canonical signature, e.g. `balanceOf(address)`.
    pub signature: String,
    pub args: Vec<Address>,
    /// Label used in diagnostics, e.g. `graviAura.balanceOf(badgerTree)`.
    pub label: String,
}

impl ContractCall {
    pub fn new(target: Address, method: &str, label: impl Into<String>) -> Self {
        Self {
            target,
            signature: normalize_signature(method),
            args: Vec::new(),
            label: label.into(),
        }
    }

    pub fn with_arg(mut self, arg: Address) -> Self {
        self.args.push(arg);
        self
    }

    /// ERC-20 `balanceOf(holder)` on `token`.
    pub fn balance_of(token: Address, holder: Address, label: impl Into<String>) -> Self {
        Self::new(token, "balanceOf(address)", label).with_arg(holder)
    }

    /// Hex-encoded calldata, `0x`-prefixed.
    pub fn calldata(&self) -> String {
        let mut data = format!("0x{}", hex::encode(function_selector(&self.signature)));
        for arg in &self.args {
            data.push_str(&arg.abi_word_hex());
        }
        data
    }
}

// =============================================================================
// CHAIN READER
// =============================================================================

/// Read-only access to the system under test.
pub trait ChainReader {
    /// Latest block number.
    fn block_number(&self) -> VerifierResult<u64>;

    /// Evaluate every call at `block`, returning the first return word of each,
    /// in call order. All-or-nothing: one failing call fails the batch.
    fn call_batch(&self, block: u64, calls: &[ContractCall]) -> VerifierResult<Vec<Word>>;

    /// Number of transactions mined in `block`, if the reader can tell.
    fn block_transaction_count(&self, _block: u64) -> VerifierResult<Option<u64>> {
        Ok(None)
    }
}

impl<R: ChainReader + ?Sized> ChainReader for &R {
    fn block_number(&self) -> VerifierResult<u64> {
        (**self).block_number()
    }

    fn call_batch(&self, block: u64, calls: &[ContractCall]) -> VerifierResult<Vec<Word>> {
        (**self).call_batch(block, calls)
    }

    fn block_transaction_count(&self, block: u64) -> VerifierResult<Option<u64>> {
        (**self).block_transaction_count(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(function_selector("balanceOf(address)")), "70a08231");
        assert_eq!(
            event_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_calldata_pads_address_argument() {
        let token = Address::parse("0x616e8bfa43f920657b3497dbf40d6b1a02d4608d").unwrap();
        let holder = Address::parse("0xfc78f8e1af80a3bf5a1783bb59ed2d1b10f78ca9").unwrap();
        let call = ContractCall::balance_of(token, holder, "want.balanceOf(whale)");
        let data = call.calldata();
        assert!(data.starts_with("0x70a08231000000000000000000000000fc78f8e1"));
        assert_eq!(data.len(), 2 + 8 + 64);
    }

    #[test]
    fn test_normalize_signature() {
        assert_eq!(normalize_signature("treasury"), "treasury()");
        assert_eq!(normalize_signature("GRAVIAURA()"), "GRAVIAURA()");
    }

    #[test]
    fn test_first_word_rejects_empty_return() {
        assert!(first_word("0x").is_err());
        let w = first_word(&format!("0x{}", "00".repeat(31) + "2a")).unwrap();
        assert_eq!(w[31], 42);
    }
}

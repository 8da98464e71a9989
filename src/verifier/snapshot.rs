//! Balance Snapshot Engine
//!
//! Captures a point-in-time view of every tracked `(entity, token)` balance plus
//! the scalar state values invariants need (fee rates, thresholds, vault balance).
//!
//! # Consistency
//!
//! A capture is ONE batched read at ONE pinned block. Reading two balances at
//! different heights would corrupt every downstream delta, so the engine never
//! splits a capture across batches and never returns a partial snapshot: if any
//! read fails the whole capture fails with `SnapshotRead`.
//!
//! # Lifecycle
//!
//! Snapshots are immutable values owned by a single verification pass. They can
//! be serialized (for offline re-verification fixtures) but the engine never
//! persists them.

use crate::verifier::address::Address;
use crate::verifier::amount::{amount_from_word, decimal, Amount};
use crate::verifier::chain::{ChainReader, ContractCall};
use crate::verifier::error::{VerifierError, VerifierResult};
use crate::verifier::registry::EntityRegistry;
use crate::verifier::tokens::TokenSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

// =============================================================================
// SCALAR PROBES
// =============================================================================

/// A uint256 view read recorded alongside balances, e.g.
/// `vault.performanceFeeGovernance()` under key `vault.performanceFeeGovernance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarProbe {
    pub key: String,
    /// Role of the contract to call.
    pub target: String,
    pub method: String,
    /// Optional role whose address is passed as the single argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<String>,
}

impl ScalarProbe {
    /// Probe keyed `<target>.<method>`.
    pub fn view(target: &str, method: &str) -> Self {
        Self {
            key: format!("{}.{}", target, method),
            target: target.to_string(),
            method: method.to_string(),
            arg: None,
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Immutable `(entity, token) → amount` mapping plus scalar state, at one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotRecord", into = "SnapshotRecord")]
pub struct Snapshot {
    block: u64,
    captured_at: DateTime<Utc>,
    balances: BTreeMap<(String, String), Amount>,
    scalars: BTreeMap<String, Amount>,
}

impl Snapshot {
    /// Empty snapshot at `block`; populate with the `with_*` builders.
    pub fn new(block: u64) -> Self {
        Self {
            block,
            captured_at: Utc::now(),
            balances: BTreeMap::new(),
            scalars: BTreeMap::new(),
        }
    }

    pub fn with_balance(mut self, entity: &str, token: &str, amount: impl Into<Amount>) -> Self {
        self.balances
            .insert((entity.to_string(), token.to_string()), amount.into());
        self
    }

    pub fn with_scalar(mut self, key: &str, amount: impl Into<Amount>) -> Self {
        self.scalars.insert(key.to_string(), amount.into());
        self
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Balance of `token` held by `entity`, if the pair was probed.
    pub fn balance(&self, entity: &str, token: &str) -> Option<&Amount> {
        self.balances.get(&(entity.to_string(), token.to_string()))
    }

    pub fn scalar(&self, key: &str) -> Option<&Amount> {
        self.scalars.get(key)
    }

    pub fn contains(&self, entity: &str, token: &str) -> bool {
        self.balance(entity, token).is_some()
    }

    /// Probed pairs in `(entity, token)` order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str, &Amount)> {
        self.balances
            .iter()
            .map(|((e, t), a)| (e.as_str(), t.as_str(), a))
    }

    pub fn scalars(&self) -> impl Iterator<Item = (&str, &Amount)> {
        self.scalars.iter().map(|(k, a)| (k.as_str(), a))
    }

    pub fn pair_count(&self) -> usize {
        self.balances.len()
    }

    /// SHA-256 over the canonical content (block, balances, scalars).
    /// Capture time is excluded so identical chain state fingerprints identically.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.block.to_be_bytes());
        for ((entity, token), amount) in &self.balances {
            hasher.update(format!("b|{}|{}|{}\n", entity, token, amount).as_bytes());
        }
        for (key, amount) in &self.scalars {
            hasher.update(format!("s|{}|{}\n", key, amount).as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Flat serialized form (JSON maps cannot use tuple keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRecord {
    block: u64,
    captured_at: DateTime<Utc>,
    balances: Vec<BalanceEntry>,
    #[serde(default)]
    scalars: Vec<ScalarEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BalanceEntry {
    entity: String,
    token: String,
    #[serde(with = "decimal")]
    amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScalarEntry {
    key: String,
    #[serde(with = "decimal")]
    amount: Amount,
}

impl TryFrom<SnapshotRecord> for Snapshot {
    type Error = VerifierError;

    fn try_from(record: SnapshotRecord) -> Result<Self, Self::Error> {
        let mut balances = BTreeMap::new();
        for entry in record.balances {
            let key = (entry.entity, entry.token);
            if balances.insert(key.clone(), entry.amount).is_some() {
                return Err(VerifierError::config(format!(
                    "snapshot lists ({}, {}) twice",
                    key.0, key.1
                )));
            }
        }
        let mut scalars = BTreeMap::new();
        for entry in record.scalars {
            if scalars.insert(entry.key.clone(), entry.amount).is_some() {
                return Err(VerifierError::config(format!(
                    "snapshot lists scalar '{}' twice",
                    entry.key
                )));
            }
        }
        Ok(Self {
            block: record.block,
            captured_at: record.captured_at,
            balances,
            scalars,
        })
    }
}

impl From<Snapshot> for SnapshotRecord {
    fn from(s: Snapshot) -> Self {
        Self {
            block: s.block,
            captured_at: s.captured_at,
            balances: s
                .balances
                .into_iter()
                .map(|((entity, token), amount)| BalanceEntry {
                    entity,
                    token,
                    amount,
                })
                .collect(),
            scalars: s
                .scalars
                .into_iter()
                .map(|(key, amount)| ScalarEntry { key, amount })
                .collect(),
        }
    }
}

// =============================================================================
// SNAPSHOT ENGINE
// =============================================================================

enum Slot {
    Balance { entity: String, token: String },
    Scalar { key: String },
}

/// Captures snapshots of a fixed entity × token grid plus scalar probes.
pub struct SnapshotEngine<'a, R: ChainReader> {
    reader: &'a R,
    registry: &'a EntityRegistry,
    tokens: &'a TokenSet,
    holders: Vec<String>,
    scalars: Vec<ScalarProbe>,
}

impl<'a, R: ChainReader> SnapshotEngine<'a, R> {
    /// Engine tracking every registry role against every token.
    pub fn new(reader: &'a R, registry: &'a EntityRegistry, tokens: &'a TokenSet) -> Self {
        Self {
            reader,
            registry,
            tokens,
            holders: registry.all_roles().into_iter().map(String::from).collect(),
            scalars: Vec::new(),
        }
    }

    /// Restrict tracked holders to `roles` (each must resolve).
    pub fn with_holders(mut self, roles: &[&str]) -> VerifierResult<Self> {
        for role in roles {
            self.registry.resolve(role)?;
        }
        self.holders = roles.iter().map(|r| r.to_string()).collect();
        Ok(self)
    }

    pub fn with_scalars(mut self, probes: &[ScalarProbe]) -> VerifierResult<Self> {
        for probe in probes {
            self.registry.resolve(&probe.target)?;
            if let Some(ref arg) = probe.arg {
                self.registry.resolve(arg)?;
            }
        }
        self.scalars = probes.to_vec();
        Ok(self)
    }

    /// Capture at the latest block.
    pub fn capture(&self) -> VerifierResult<Snapshot> {
        let block = self.reader.block_number()?;
        self.capture_at(block)
    }

    /// Capture at `block` in a single batched read.
    pub fn capture_at(&self, block: u64) -> VerifierResult<Snapshot> {
        let (slots, calls) = self.plan()?;
        debug!(block, reads = calls.len(), "Capturing snapshot");

        let words = self.reader.call_batch(block, &calls)?;
        if words.len() != calls.len() {
            return Err(VerifierError::SnapshotRead {
                call: "snapshot batch".into(),
                reason: format!("expected {} results, got {}", calls.len(), words.len()),
            });
        }

        let mut snapshot = Snapshot::new(block);
        for (slot, word) in slots.into_iter().zip(words.iter()) {
            let amount = amount_from_word(word);
            match slot {
                Slot::Balance { entity, token } => {
                    snapshot.balances.insert((entity, token), amount);
                }
                Slot::Scalar { key } => {
                    snapshot.scalars.insert(key, amount);
                }
            }
        }

        info!(
            block,
            pairs = snapshot.pair_count(),
            scalars = snapshot.scalars.len(),
            "Snapshot captured"
        );
        Ok(snapshot)
    }

    fn plan(&self) -> VerifierResult<(Vec<Slot>, Vec<ContractCall>)> {
        let mut slots = Vec::new();
        let mut calls = Vec::new();

        for holder in &self.holders {
            let holder_addr = self.registry.resolve(holder)?;
            for (label, token_addr) in self.tokens.iter() {
                calls.push(ContractCall::balance_of(
                    token_addr.clone(),
                    holder_addr.clone(),
                    format!("{}.balanceOf({})", label, holder),
                ));
                slots.push(Slot::Balance {
                    entity: holder.clone(),
                    token: label.to_string(),
                });
            }
        }

        for probe in &self.scalars {
            let target: Address = self.registry.resolve(&probe.target)?.clone();
            let mut call = ContractCall::new(target, &probe.method, probe.key.clone());
            if let Some(ref arg) = probe.arg {
                if !probe.method.contains('(') {
                    call.signature = format!("{}(address)", probe.method.trim());
                }
                call = call.with_arg(self.registry.resolve(arg)?.clone());
            }
            calls.push(call);
            slots.push(Slot::Scalar {
                key: probe.key.clone(),
            });
        }

        Ok((slots, calls))
    }
}

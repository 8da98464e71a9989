//! Shared fixtures for verifier tests: an in-memory chain and the aura
//! deployment used across the suites.

use crate::verifier::address::Address;
use crate::verifier::amount::Amount;
use crate::verifier::chain::{normalize_signature, ChainReader, ContractCall, Word};
use crate::verifier::error::{VerifierError, VerifierResult};
use crate::verifier::events::{EventRecord, HARVESTED, TREE_DISTRIBUTION};
use crate::verifier::registry::EntityRegistry;
use crate::verifier::snapshot::Snapshot;
use crate::verifier::tokens::TokenSet;
use crate::verifier::variants::{
    scalars, AURABAL_REWARDS, BBA_USD_REWARDS, B_BBA_USD_VAULT, GRAVIAURA_VAULT,
};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};

pub fn addr(n: u8) -> Address {
    Address::parse(&format!("0x{:040x}", n)).unwrap()
}

pub fn amt(n: u64) -> Amount {
    Amount::from(n)
}

fn amount_word(amount: &Amount) -> Word {
    let bytes = amount.to_bytes_be();
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    word
}

fn address_word(address: &Address) -> Word {
    let mut word = [0u8; 32];
    let bytes = hex::decode(address.hex_body()).unwrap();
    word[12..].copy_from_slice(&bytes);
    word
}

// =============================================================================
// MOCK CHAIN
// =============================================================================

type ValueKey = (Address, String, Option<Address>);

#[derive(Default)]
struct MockState {
    head: u64,
    accessors: HashMap<(Address, String), Address>,
    values: HashMap<ValueKey, BTreeMap<u64, Amount>>,
    reverting: HashSet<String>,
    tx_counts: HashMap<u64, u64>,
}

/// In-memory chain with per-block value history. Values persist until
/// overwritten at a later block, like contract storage.
pub struct MockChain {
    state: RefCell<MockState>,
    batches: Cell<usize>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            state: RefCell::new(MockState {
                head,
                ..MockState::default()
            }),
            batches: Cell::new(0),
        }
    }

    pub fn head(&self) -> u64 {
        self.state.borrow().head
    }

    pub fn set_tx_count(&self, block: u64, count: u64) {
        self.state.borrow_mut().tx_counts.insert(block, count);
    }

    /// Advance the head by one block and return it.
    pub fn mine(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.head += 1;
        state.head
    }

    pub fn set_accessor(&self, target: &Address, method: &str, value: &Address) {
        self.state
            .borrow_mut()
            .accessors
            .insert((target.clone(), normalize_signature(method)), value.clone());
    }

    pub fn set_balance(&self, block: u64, token: &Address, holder: &Address, amount: u64) {
        self.set_value(
            block,
            (token.clone(), "balanceOf(address)".into(), Some(holder.clone())),
            amount,
        );
    }

    pub fn set_scalar(&self, block: u64, target: &Address, method: &str, amount: u64) {
        self.set_value(block, (target.clone(), normalize_signature(method), None), amount);
    }

    fn set_value(&self, block: u64, key: ValueKey, amount: u64) {
        self.state
            .borrow_mut()
            .values
            .entry(key)
            .or_default()
            .insert(block, amt(amount));
    }

    /// Make every call carrying `label` revert.
    pub fn revert_on(&self, label: &str) {
        self.state.borrow_mut().reverting.insert(label.to_string());
    }

    pub fn batch_count(&self) -> usize {
        self.batches.get()
    }

    fn answer(&self, state: &MockState, block: u64, call: &ContractCall) -> VerifierResult<Word> {
        if state.reverting.contains(&call.label) {
            return Err(VerifierError::SnapshotRead {
                call: call.label.clone(),
                reason: "execution reverted".into(),
            });
        }
        if call.args.is_empty() {
            if let Some(a) = state.accessors.get(&(call.target.clone(), call.signature.clone())) {
                return Ok(address_word(a));
            }
        }
        let key = (call.target.clone(), call.signature.clone(), call.args.first().cloned());
        match state.values.get(&key) {
            Some(history) => Ok(history
                .range(..=block)
                .next_back()
                .map(|(_, v)| amount_word(v))
                .unwrap_or([0u8; 32])),
            None if call.signature == "balanceOf(address)" => Ok([0u8; 32]),
            None => Err(VerifierError::SnapshotRead {
                call: call.label.clone(),
                reason: "execution reverted".into(),
            }),
        }
    }
}

impl ChainReader for MockChain {
    fn block_number(&self) -> VerifierResult<u64> {
        Ok(self.head())
    }

    fn call_batch(&self, block: u64, calls: &[ContractCall]) -> VerifierResult<Vec<Word>> {
        self.batches.set(self.batches.get() + 1);
        let state = self.state.borrow();
        if block > state.head {
            return Err(VerifierError::SnapshotRead {
                call: "batch".into(),
                reason: format!("block {} is beyond head {}", block, state.head),
            });
        }
        calls.iter().map(|c| self.answer(&state, block, c)).collect()
    }

    fn block_transaction_count(&self, block: u64) -> VerifierResult<Option<u64>> {
        Ok(self.state.borrow().tx_counts.get(&block).copied())
    }
}

// =============================================================================
// AURA DEPLOYMENT
// =============================================================================

/// Addresses of the aura deployment fixture.
pub struct AuraDeployment {
    pub vault: Address,
    pub strategy: Address,
    pub treasury: Address,
    pub strategist: Address,
    pub tree: Address,
    pub aurabal_rewards: Address,
    pub bba_rewards: Address,
    pub want: Address,
    pub aura: Address,
    pub gravi_aura: Address,
    pub bba_usd: Address,
    pub b_bba_usd: Address,
    pub weth: Address,
}

impl AuraDeployment {
    pub fn new() -> Self {
        Self {
            vault: addr(1),
            strategy: addr(2),
            treasury: addr(3),
            strategist: addr(4),
            tree: addr(5),
            aurabal_rewards: addr(6),
            bba_rewards: addr(7),
            // want is auraBal
            want: addr(0x11),
            aura: addr(0x12),
            gravi_aura: addr(0x13),
            bba_usd: addr(0x14),
            b_bba_usd: addr(0x15),
            weth: addr(0x16),
        }
    }

    pub fn registry(&self) -> EntityRegistry {
        EntityRegistry::from_entries(vec![
            ("strategy", self.strategy.clone()),
            ("vault", self.vault.clone()),
            ("treasury", self.treasury.clone()),
            ("strategist", self.strategist.clone()),
            ("badgerTree", self.tree.clone()),
            (AURABAL_REWARDS, self.aurabal_rewards.clone()),
            (BBA_USD_REWARDS, self.bba_rewards.clone()),
            (GRAVIAURA_VAULT, self.gravi_aura.clone()),
            (B_BBA_USD_VAULT, self.b_bba_usd.clone()),
        ])
        .unwrap()
    }

    pub fn tokens(&self) -> TokenSet {
        TokenSet::from_entries(vec![
            ("want", self.want.clone()),
            ("aura", self.aura.clone()),
            ("auraBal", self.want.clone()),
            ("graviAura", self.gravi_aura.clone()),
            ("bbaUsd", self.bba_usd.clone()),
            ("bBbaUsd", self.b_bba_usd.clone()),
            ("weth", self.weth.clone()),
        ])
        .unwrap()
    }

    /// Chain at `head` with every accessor the aura policy reads and the fee
    /// configuration of the live vault (10% governance, 0% strategist).
    pub fn chain(&self, head: u64) -> MockChain {
        let chain = MockChain::new(head);
        chain.set_accessor(&self.vault, "treasury", &self.treasury);
        chain.set_accessor(&self.vault, "strategist", &self.strategist);
        chain.set_accessor(&self.vault, "badgerTree", &self.tree);
        for (method, target) in [
            ("AURABAL_REWARDS", &self.aurabal_rewards),
            ("BB_A_USD_REWARDS", &self.bba_rewards),
            ("want", &self.want),
            ("AURA", &self.aura),
            ("AURABAL", &self.want),
            ("GRAVIAURA", &self.gravi_aura),
            ("BB_A_USD", &self.bba_usd),
            ("B_BB_A_USD", &self.b_bba_usd),
            ("WETH", &self.weth),
        ] {
            chain.set_accessor(&self.strategy, method, target);
        }
        chain.set_scalar(0, &self.vault, "balance", 10_000);
        chain.set_scalar(0, &self.vault, "performanceFeeGovernance", 1_000);
        chain.set_scalar(0, &self.vault, "performanceFeeStrategist", 0);
        chain.set_scalar(0, &self.strategy, "minBbaUsdHarvest", 1_000);
        chain
    }

    /// Zero-filled snapshot over every role × label with the default scalars.
    pub fn grid(&self, block: u64) -> Snapshot {
        let mut snapshot = Snapshot::new(block)
            .with_scalar(scalars::VAULT_BALANCE, amt(10_000))
            .with_scalar(scalars::GOVERNANCE_FEE, amt(1_000))
            .with_scalar(scalars::STRATEGIST_FEE, amt(0))
            .with_scalar(scalars::MIN_BBA_USD_HARVEST, amt(1_000));
        let registry = self.registry();
        let tokens = self.tokens();
        for role in registry.all_roles() {
            for label in tokens.labels() {
                snapshot = snapshot.with_balance(role, label, amt(0));
            }
        }
        snapshot
    }

    pub fn harvested(&self, amount: u64) -> EventRecord {
        EventRecord::token_amount(HARVESTED, &self.want, amount)
    }

    pub fn distribution(&self, token: &Address, amount: u64) -> EventRecord {
        EventRecord::token_amount(TREE_DISTRIBUTION, token, amount)
    }

    pub fn bba_inflow(&self, amount: u64) -> EventRecord {
        EventRecord::transfer(&self.bba_usd, &self.bba_rewards, &self.strategy, amount)
    }
}

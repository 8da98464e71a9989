//! Entity Registry
//!
//! Maps stable role names (`strategy`, `vault`, `treasury`, `strategist`,
//! `badgerTree`, plus variant roles such as `bbaUsdRewards`) to the addresses
//! they have in the deployment being verified.
//!
//! Addresses are discovered, not hard-coded: only `vault` and `strategy` come
//! from configuration, everything else is read from the deployment through
//! accessor calls (`vault.treasury()`, `strategy.AURABAL_REWARDS()`, ...).
//! Discovery runs in dependency passes, one batched read per pass, all pinned
//! to the same block.

use crate::verifier::address::Address;
use crate::verifier::chain::{ChainReader, ContractCall};
use crate::verifier::error::{VerifierError, VerifierResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Well-known role names.
pub mod roles {
    pub const STRATEGY: &str = "strategy";
    pub const VAULT: &str = "vault";
    pub const TREASURY: &str = "treasury";
    pub const STRATEGIST: &str = "strategist";
    pub const BADGER_TREE: &str = "badgerTree";
}

// =============================================================================
// ADDRESS SOURCES
// =============================================================================

/// Where an address comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    /// Fixed address (configuration).
    Static(Address),
    /// Zero-argument view on an already resolved entity, returning an address.
    Accessor { of: String, method: String },
}

impl AddressSource {
    pub fn accessor(of: &str, method: &str) -> Self {
        Self::Accessor {
            of: of.to_string(),
            method: method.to_string(),
        }
    }
}

/// A role and how to find its address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub role: String,
    pub source: AddressSource,
}

impl RoleSpec {
    pub fn new(role: &str, source: AddressSource) -> Self {
        Self {
            role: role.to_string(),
            source,
        }
    }
}

/// The roles every vault deployment exposes.
pub fn core_roles(vault: Address, strategy: Address) -> Vec<RoleSpec> {
    vec![
        RoleSpec::new(roles::STRATEGY, AddressSource::Static(strategy)),
        RoleSpec::new(roles::VAULT, AddressSource::Static(vault)),
        RoleSpec::new(roles::TREASURY, AddressSource::accessor(roles::VAULT, "treasury")),
        RoleSpec::new(roles::STRATEGIST, AddressSource::accessor(roles::VAULT, "strategist")),
        RoleSpec::new(roles::BADGER_TREE, AddressSource::accessor(roles::VAULT, "badgerTree")),
    ]
}

/// Execute `(key, call)` accessor reads as one batch and decode addresses.
pub(crate) fn read_addresses<K, R: ChainReader>(
    reader: &R,
    block: u64,
    pending: Vec<(K, ContractCall)>,
) -> VerifierResult<Vec<(K, Address)>> {
    if pending.is_empty() {
        return Ok(Vec::new());
    }
    let calls: Vec<ContractCall> = pending.iter().map(|(_, c)| c.clone()).collect();
    let words = reader.call_batch(block, &calls)?;
    if words.len() != calls.len() {
        return Err(VerifierError::SnapshotRead {
            call: "accessor batch".into(),
            reason: format!("expected {} results, got {}", calls.len(), words.len()),
        });
    }
    Ok(pending
        .into_iter()
        .zip(words.iter())
        .map(|((name, _), word)| (name, Address::from_word(word)))
        .collect())
}

// =============================================================================
// ENTITY REGISTRY
// =============================================================================

/// Resolved role → address table, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRegistry {
    entries: Vec<(String, Address)>,
}

impl EntityRegistry {
    /// Build directly from known addresses (offline replay, tests).
    pub fn from_entries<I, S>(entries: I) -> VerifierResult<Self>
    where
        I: IntoIterator<Item = (S, Address)>,
        S: Into<String>,
    {
        let mut registry = Self::default();
        for (role, address) in entries {
            registry.insert(role.into(), address)?;
        }
        Ok(registry)
    }

    /// Discover every role in `specs` against the deployment at `block`.
    pub fn discover<R: ChainReader>(
        reader: &R,
        block: u64,
        specs: &[RoleSpec],
    ) -> VerifierResult<Self> {
        let mut registry = Self::default();
        let mut pending: Vec<&RoleSpec> = Vec::new();

        for spec in specs {
            match &spec.source {
                AddressSource::Static(address) => registry.insert(spec.role.clone(), address.clone())?,
                AddressSource::Accessor { .. } => pending.push(spec),
            }
        }

        let mut pass = 0usize;
        while !pending.is_empty() {
            pass += 1;
            let mut ready = Vec::new();
            let mut blocked = Vec::new();
            for spec in pending {
                let AddressSource::Accessor { of, method } = &spec.source else {
                    continue;
                };
                match registry.get(of) {
                    Some(target) => ready.push((
                        spec.role.clone(),
                        ContractCall::new(target.clone(), method, format!("{}.{}", of, method)),
                    )),
                    None => blocked.push(spec),
                }
            }

            if ready.is_empty() {
                // Nothing resolvable this pass: the first blocked spec names a role
                // that no spec provides.
                let missing = blocked
                    .iter()
                    .find_map(|s| match &s.source {
                        AddressSource::Accessor { of, .. } => Some(of.clone()),
                        AddressSource::Static(_) => None,
                    })
                    .unwrap_or_default();
                return Err(VerifierError::UnknownRole { role: missing });
            }

            debug!(pass, reads = ready.len(), block, "Resolving entity accessors");
            for (role, address) in read_addresses(reader, block, ready)? {
                // An unset accessor reads as the zero address.
                if address.is_zero() {
                    warn!(role = %role, block, "Role accessor returned the zero address");
                    return Err(VerifierError::UnknownRole { role });
                }
                registry.insert(role, address)?;
            }
            pending = blocked;
        }

        info!(roles = registry.len(), block, "Entity registry resolved");
        Ok(registry)
    }

    fn insert(&mut self, role: String, address: Address) -> VerifierResult<()> {
        if self.get(&role).is_some() {
            return Err(VerifierError::config(format!("duplicate role '{}'", role)));
        }
        self.entries.push((role, address));
        Ok(())
    }

    fn get(&self, role: &str) -> Option<&Address> {
        self.entries
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, a)| a)
    }

    /// Address of `role`; `UnknownRole` if the deployment has no such role.
    pub fn resolve(&self, role: &str) -> VerifierResult<&Address> {
        self.get(role).ok_or_else(|| VerifierError::UnknownRole {
            role: role.to_string(),
        })
    }

    /// Every role, in declaration order.
    pub fn all_roles(&self) -> Vec<&str> {
        self.entries.iter().map(|(r, _)| r.as_str()).collect()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.get(role).is_some()
    }

    /// Role whose address is `address`, if any.
    pub fn role_of(&self, address: &Address) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, a)| a == address)
            .map(|(r, _)| r.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Address)> {
        self.entries.iter().map(|(r, a)| (r.as_str(), a))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

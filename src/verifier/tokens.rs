//! Token Set Resolver
//!
//! Each variant declares which tokens are economically relevant to its harvest
//! (want, reward tokens, intermediate swap tokens) as an ordered list of
//! `(label, source)` pairs. Resolution turns that list into addresses with one
//! batched read; after that the set is static for the verification pass.
//!
//! Labels are the join key used by every check. They must be unique within a
//! set; addresses need not be (a variant may track its want token under a second
//! label).

use crate::verifier::address::Address;
use crate::verifier::chain::{ChainReader, ContractCall};
use crate::verifier::error::{VerifierError, VerifierResult};
use crate::verifier::policy::HarvestPolicy;
use crate::verifier::registry::{read_addresses, AddressSource, EntityRegistry};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A token label and where its address comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpec {
    pub label: String,
    pub source: AddressSource,
}

impl TokenSpec {
    pub fn new(label: &str, source: AddressSource) -> Self {
        Self {
            label: label.to_string(),
            source,
        }
    }

    /// Token whose address is returned by `strategy.<method>()`.
    pub fn on_strategy(label: &str, method: &str) -> Self {
        Self::new(label, AddressSource::accessor("strategy", method))
    }
}

/// Ordered `(label, address)` set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    entries: Vec<(String, Address)>,
}

impl TokenSet {
    pub fn from_entries<I, S>(entries: I) -> VerifierResult<Self>
    where
        I: IntoIterator<Item = (S, Address)>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for (label, address) in entries {
            set.insert(label.into(), address)?;
        }
        Ok(set)
    }

    /// Resolve `specs` against the deployment at `block`. Accessor sources must
    /// name roles present in `registry`.
    pub fn resolve<R: ChainReader>(
        reader: &R,
        block: u64,
        registry: &EntityRegistry,
        specs: &[TokenSpec],
    ) -> VerifierResult<Self> {
        let mut resolved: Vec<Option<Address>> = Vec::with_capacity(specs.len());
        let mut reads = Vec::new();

        for (idx, spec) in specs.iter().enumerate() {
            match &spec.source {
                AddressSource::Static(address) => resolved.push(Some(address.clone())),
                AddressSource::Accessor { of, method } => {
                    let target = registry.resolve(of)?.clone();
                    reads.push((
                        idx,
                        ContractCall::new(target, method, format!("{}.{}", of, method)),
                    ));
                    resolved.push(None);
                }
            }
        }

        for (idx, address) in read_addresses(reader, block, reads)? {
            if address.is_zero() {
                continue;
            }
            if let Some(slot) = resolved.get_mut(idx) {
                *slot = Some(address);
            }
        }

        let mut set = Self::default();
        for (spec, address) in specs.iter().zip(resolved) {
            let address = address.ok_or_else(|| VerifierError::UnresolvedToken {
                label: spec.label.clone(),
            })?;
            set.insert(spec.label.clone(), address)?;
        }

        info!(tokens = set.len(), block, "Token set resolved");
        Ok(set)
    }

    fn insert(&mut self, label: String, address: Address) -> VerifierResult<()> {
        if self.entries.iter().any(|(l, _)| *l == label) {
            return Err(VerifierError::config(format!("duplicate token label '{}'", label)));
        }
        self.entries.push((label, address));
        Ok(())
    }

    /// Address for `label`; `UnresolvedToken` if the set does not track it.
    pub fn get(&self, label: &str) -> VerifierResult<&Address> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, a)| a)
            .ok_or_else(|| VerifierError::UnresolvedToken {
                label: label.to_string(),
            })
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|(l, _)| l == label)
    }

    /// Labels in declaration order.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|(l, _)| l.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Address)> {
        self.entries.iter().map(|(l, a)| (l.as_str(), a))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve the token set a policy declares.
pub fn tokens_for<R: ChainReader>(
    policy: &HarvestPolicy,
    reader: &R,
    block: u64,
    registry: &EntityRegistry,
) -> VerifierResult<TokenSet> {
    TokenSet::resolve(reader, block, registry, &policy.tokens)
}

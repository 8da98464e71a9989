//! Harvest Policy
//!
//! A variant is a value, not a type. Everything that differs between strategy
//! flavours (extra roles, tracked tokens, scalar probes, and the ordered list of
//! checks with their token bindings) lives in a [`HarvestPolicy`], which can be
//! built in code (see `variants`) or loaded from TOML.
//!
//! # Check vocabulary
//!
//! | kind            | asserts                                                      |
//! |-----------------|--------------------------------------------------------------|
//! | `harvested`     | one Harvested event, want token, amount == measured delta    |
//! | `distributions` | count, per-event recipient/fee gains, event amount == delta  |
//! | `threshold_gate`| accumulate below threshold, flush to zero at/above it        |
//! | `dust`          | routing tokens end at zero on the holder                     |
//! | `conservation`  | recipients' gains never exceed the source's loss             |
//! | `gained`        | an entity strictly gained a token (optionally conditional)   |
//! | `scalar`        | a scalar state value equals / is positive / is zero          |

use crate::verifier::address::Address;
use crate::verifier::amount::{decimal, Amount};
use crate::verifier::error::{SnapshotSide, VerifierError, VerifierResult};
use crate::verifier::events::{EventRecord, HARVESTED, TRANSFER, TREE_DISTRIBUTION};
use crate::verifier::registry::{core_roles, roles, AddressSource, EntityRegistry, RoleSpec};
use crate::verifier::snapshot::ScalarProbe;
use crate::verifier::tokens::TokenSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn default_harvested_event() -> String {
    HARVESTED.to_string()
}

fn default_distribution_event() -> String {
    TREE_DISTRIBUTION.to_string()
}

fn default_transfer_event() -> String {
    TRANSFER.to_string()
}

fn default_recipient() -> String {
    roles::BADGER_TREE.to_string()
}

// =============================================================================
// CHECK PARAMETERS
// =============================================================================

/// What the Harvested event amount is compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountSource {
    /// Delta of a scalar probe (e.g. `vault.balance`).
    Scalar(String),
    /// Balance delta of `(entity, token)`.
    Balance { entity: String, token: String },
}

/// How distribution events are paired with expected tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMode {
    /// Match each event to the expected token whose address it reports.
    /// Events without a `token` field fall back to their position.
    #[default]
    TokenIdentity,
    /// Pair the i-th event with the i-th expected token.
    Positional,
}

/// Fee recipient that must gain each distributed token when its rate is nonzero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRecipient {
    pub role: String,
    /// Scalar key holding the fee rate (read from the before snapshot).
    pub rate: String,
}

impl FeeRecipient {
    pub fn new(role: &str, rate: &str) -> Self {
        Self {
            role: role.to_string(),
            rate: rate.to_string(),
        }
    }
}

/// One expected distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRule {
    pub token: String,
    /// Label of a threshold-gated token; this distribution is only expected in
    /// a harvest where that token flushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gated_by: Option<String>,
}

impl DistributionRule {
    pub fn always(token: &str) -> Self {
        Self {
            token: token.to_string(),
            gated_by: None,
        }
    }

    pub fn gated(token: &str, gate: &str) -> Self {
        Self {
            token: token.to_string(),
            gated_by: Some(gate.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionCheck {
    #[serde(default = "default_distribution_event")]
    pub event: String,
    #[serde(default = "default_recipient")]
    pub recipient: String,
    #[serde(default)]
    pub matching: MatchingMode,
    #[serde(default)]
    pub fees: Vec<FeeRecipient>,
    /// Expected distributions, in the order the operation emits them.
    pub tokens: Vec<DistributionRule>,
}

/// Either a registry role or a literal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressRef {
    Role(String),
    Address(Address),
}

impl AddressRef {
    pub fn resolve(&self, registry: &EntityRegistry) -> VerifierResult<Address> {
        match self {
            Self::Role(role) => registry.resolve(role).cloned(),
            Self::Address(a) => Ok(a.clone()),
        }
    }
}

/// Which transfers count as reward inflow into the gated holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflowFilter {
    #[serde(default = "default_transfer_event")]
    pub event: String,
    pub from: AddressRef,
}

impl InflowFilter {
    pub fn from_role(role: &str) -> Self {
        Self {
            event: default_transfer_event(),
            from: AddressRef::Role(role.to_string()),
        }
    }

    /// Bind against resolved addresses.
    pub fn bind(
        &self,
        registry: &EntityRegistry,
        token: &Address,
        recipient: &Address,
    ) -> VerifierResult<TransferInflow> {
        Ok(TransferInflow {
            event: self.event.clone(),
            token: token.clone(),
            source: self.from.resolve(registry)?,
            recipient: recipient.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdGate {
    pub token: String,
    pub holder: String,
    /// Scalar key holding the flush threshold.
    pub threshold: String,
    pub inflow: InflowFilter,
}

/// Expected property of a scalar value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarExpect {
    Equals(#[serde(with = "decimal")] Amount),
    Positive,
    Zero,
}

// =============================================================================
// POLICY CHECK
// =============================================================================

/// One named check with its bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyCheck {
    Harvested {
        #[serde(default = "default_harvested_event")]
        event: String,
        token: String,
        amount: AmountSource,
    },
    Distributions(DistributionCheck),
    ThresholdGate(ThresholdGate),
    Dust {
        holder: String,
        tokens: Vec<String>,
    },
    Conservation {
        token: String,
        source: String,
        recipients: Vec<String>,
    },
    Gained {
        entity: String,
        token: String,
        /// Only asserted when this scalar is nonzero in the before snapshot.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unless_zero: Option<String>,
    },
    Scalar {
        key: String,
        at: SnapshotSide,
        expect: ScalarExpect,
    },
}

impl PolicyCheck {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Harvested { .. } => "harvested",
            Self::Distributions(_) => "distributions",
            Self::ThresholdGate(_) => "threshold_gate",
            Self::Dust { .. } => "dust",
            Self::Conservation { .. } => "conservation",
            Self::Gained { .. } => "gained",
            Self::Scalar { .. } => "scalar",
        }
    }

    fn token_refs(&self) -> Vec<&str> {
        match self {
            Self::Harvested { token, amount, .. } => {
                let mut out = vec![token.as_str()];
                if let AmountSource::Balance { token, .. } = amount {
                    out.push(token);
                }
                out
            }
            Self::Distributions(d) => d
                .tokens
                .iter()
                .flat_map(|r| std::iter::once(r.token.as_str()).chain(r.gated_by.as_deref()))
                .collect(),
            Self::ThresholdGate(g) => vec![g.token.as_str()],
            Self::Dust { tokens, .. } => tokens.iter().map(String::as_str).collect(),
            Self::Conservation { token, .. } | Self::Gained { token, .. } => vec![token.as_str()],
            Self::Scalar { .. } => Vec::new(),
        }
    }

    fn role_refs(&self) -> Vec<&str> {
        match self {
            Self::Harvested { amount, .. } => match amount {
                AmountSource::Balance { entity, .. } => vec![entity.as_str()],
                AmountSource::Scalar(_) => Vec::new(),
            },
            Self::Distributions(d) => std::iter::once(d.recipient.as_str())
                .chain(d.fees.iter().map(|f| f.role.as_str()))
                .collect(),
            Self::ThresholdGate(g) => {
                let mut out = vec![g.holder.as_str()];
                if let AddressRef::Role(ref r) = g.inflow.from {
                    out.push(r);
                }
                out
            }
            Self::Dust { holder, .. } => vec![holder.as_str()],
            Self::Conservation {
                source, recipients, ..
            } => std::iter::once(source.as_str())
                .chain(recipients.iter().map(String::as_str))
                .collect(),
            Self::Gained { entity, .. } => vec![entity.as_str()],
            Self::Scalar { .. } => Vec::new(),
        }
    }

    fn scalar_refs(&self) -> Vec<&str> {
        match self {
            Self::Harvested { amount, .. } => match amount {
                AmountSource::Scalar(key) => vec![key.as_str()],
                AmountSource::Balance { .. } => Vec::new(),
            },
            Self::Distributions(d) => d.fees.iter().map(|f| f.rate.as_str()).collect(),
            Self::ThresholdGate(g) => vec![g.threshold.as_str()],
            Self::Gained { unless_zero, .. } => unless_zero.iter().map(String::as_str).collect(),
            Self::Scalar { key, .. } => vec![key.as_str()],
            Self::Dust { .. } | Self::Conservation { .. } => Vec::new(),
        }
    }
}

// =============================================================================
// HARVEST POLICY
// =============================================================================

/// Complete description of one strategy variant's harvest accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestPolicy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Variant-specific roles beyond the core vault roles.
    #[serde(default)]
    pub entities: Vec<RoleSpec>,
    pub tokens: Vec<TokenSpec>,
    #[serde(default)]
    pub scalars: Vec<ScalarProbe>,
    pub checks: Vec<PolicyCheck>,
}

impl HarvestPolicy {
    /// Parse a policy from TOML text.
    pub fn from_toml(text: &str) -> VerifierResult<Self> {
        let policy: Self = toml::from_str(text)
            .map_err(|e| VerifierError::config(format!("invalid policy: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Core roles for `vault`/`strategy` followed by the variant's own roles.
    pub fn role_specs(&self, vault: Address, strategy: Address) -> Vec<RoleSpec> {
        let mut specs = core_roles(vault, strategy);
        specs.extend(self.entities.iter().cloned());
        specs
    }

    /// Static consistency: every label, role and scalar key a check references is
    /// declared by this policy. Catches a misconfigured variant before any read.
    pub fn validate(&self) -> VerifierResult<()> {
        let labels: BTreeSet<&str> = self.tokens.iter().map(|t| t.label.as_str()).collect();
        if labels.len() != self.tokens.len() {
            return Err(VerifierError::config(format!(
                "policy '{}' declares a token label twice",
                self.name
            )));
        }

        let mut known_roles: BTreeSet<&str> = [
            roles::STRATEGY,
            roles::VAULT,
            roles::TREASURY,
            roles::STRATEGIST,
            roles::BADGER_TREE,
        ]
        .into_iter()
        .collect();
        known_roles.extend(self.entities.iter().map(|e| e.role.as_str()));

        let scalar_keys: BTreeSet<&str> = self.scalars.iter().map(|s| s.key.as_str()).collect();
        for probe in &self.scalars {
            for role in std::iter::once(&probe.target).chain(probe.arg.iter()) {
                if !known_roles.contains(role.as_str()) {
                    return Err(VerifierError::UnknownRole { role: role.clone() });
                }
            }
        }
        for token in &self.tokens {
            if let AddressSource::Accessor { ref of, .. } = token.source {
                if !known_roles.contains(of.as_str()) {
                    return Err(VerifierError::UnknownRole { role: of.clone() });
                }
            }
        }

        let gates: BTreeSet<&str> = self
            .checks
            .iter()
            .filter_map(|c| match c {
                PolicyCheck::ThresholdGate(g) => Some(g.token.as_str()),
                _ => None,
            })
            .collect();

        for check in &self.checks {
            for label in check.token_refs() {
                if !labels.contains(label) {
                    return Err(VerifierError::UnresolvedToken {
                        label: label.to_string(),
                    });
                }
            }
            for role in check.role_refs() {
                if !known_roles.contains(role) {
                    return Err(VerifierError::UnknownRole {
                        role: role.to_string(),
                    });
                }
            }
            for key in check.scalar_refs() {
                if !scalar_keys.contains(key) {
                    return Err(VerifierError::config(format!(
                        "check '{}' reads undeclared scalar '{}'",
                        check.name(),
                        key
                    )));
                }
            }
            if let PolicyCheck::Distributions(d) = check {
                for rule in &d.tokens {
                    if let Some(ref gate) = rule.gated_by {
                        if !gates.contains(gate.as_str()) {
                            return Err(VerifierError::config(format!(
                                "distribution of '{}' is gated by '{}', which has no threshold_gate check",
                                rule.token, gate
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Threshold gate declared for `token`, if any.
    pub fn threshold_gate(&self, token: &str) -> Option<&ThresholdGate> {
        self.checks.iter().find_map(|c| match c {
            PolicyCheck::ThresholdGate(g) if g.token == token => Some(g),
            _ => None,
        })
    }
}

// =============================================================================
// REWARD INFLOW PREDICATE
// =============================================================================

/// Decides whether an event moved reward tokens into the gated holder.
pub trait RewardInflow {
    fn is_reward_inflow(&self, record: &EventRecord) -> bool;
}

impl<F> RewardInflow for F
where
    F: Fn(&EventRecord) -> bool,
{
    fn is_reward_inflow(&self, record: &EventRecord) -> bool {
        self(record)
    }
}

/// `event` of `token` from `source` to `recipient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInflow {
    pub event: String,
    pub token: Address,
    pub source: Address,
    pub recipient: Address,
}

impl RewardInflow for TransferInflow {
    fn is_reward_inflow(&self, record: &EventRecord) -> bool {
        if record.kind != self.event {
            return false;
        }
        let matches = |field: &str, want: &Address| {
            record.address(field).map(|a| a == *want).unwrap_or(false)
        };
        matches("token", &self.token) && matches("from", &self.source) && matches("to", &self.recipient)
    }
}

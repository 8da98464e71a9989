//! Built-in Strategy Variants
//!
//! Each variant is a [`HarvestPolicy`] value. Adding a flavour means adding a
//! constructor here (or shipping a TOML policy), never a new checker.

use crate::verifier::policy::{
    AmountSource, DistributionCheck, DistributionRule, FeeRecipient, HarvestPolicy, InflowFilter,
    MatchingMode, PolicyCheck, ThresholdGate,
};
use crate::verifier::registry::{roles, AddressSource, RoleSpec};
use crate::verifier::snapshot::ScalarProbe;
use crate::verifier::tokens::TokenSpec;
use std::collections::HashMap;

/// Scalar keys shared by the built-in variants.
pub mod scalars {
    pub const VAULT_BALANCE: &str = "vault.balance";
    pub const GOVERNANCE_FEE: &str = "vault.performanceFeeGovernance";
    pub const STRATEGIST_FEE: &str = "vault.performanceFeeStrategist";
    pub const MIN_BBA_USD_HARVEST: &str = "strategy.minBbaUsdHarvest";
}

/// Variant-specific role: reward pool paying `bbaUsd` to the strategy.
pub const BBA_USD_REWARDS: &str = "bbaUsdRewards";
/// Variant-specific role: auraBal staking rewards contract.
pub const AURABAL_REWARDS: &str = "auraBalRewards";
/// Variant-specific role: the graviAura vault the strategy deposits into.
pub const GRAVIAURA_VAULT: &str = "graviAuraVault";
/// Variant-specific role: the bBbaUsd vault the strategy deposits into.
pub const B_BBA_USD_VAULT: &str = "bBbaUsdVault";

/// Get list of available variant names with descriptions.
pub fn available_variants() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    map.insert(
        "aura_bal_staker",
        "auraBal staker: compounds auraBal, emits graviAura and bBbaUsd to the tree",
    );
    map.insert(
        "bvl_oxd_staker",
        "bvlOXD staker: compounds want, emits bvlOxd to the tree",
    );
    map
}

/// Resolve a built-in variant by name.
///
/// # Arguments
/// * `name` - Variant name (case-insensitive, `-` and `_` interchangeable)
///
/// # Returns
/// * `Ok(HarvestPolicy)` on success
/// * `Err(String)` with available variant names on failure
pub fn variant_by_name(name: &str) -> Result<HarvestPolicy, String> {
    let name_lower = name.to_lowercase().replace('-', "_");

    match name_lower.as_str() {
        "aura_bal_staker" | "aurabal" | "aura_bal" => Ok(aura_bal_staker()),
        "bvl_oxd_staker" | "bvloxd" | "oxd" => Ok(bvl_oxd_staker()),
        _ => {
            let mut available: Vec<_> = available_variants().keys().copied().collect();
            available.sort_unstable();
            Err(format!(
                "Unknown variant: '{}'. Available variants: {}",
                name,
                available.join(", ")
            ))
        }
    }
}

fn fee_probes() -> Vec<ScalarProbe> {
    vec![
        ScalarProbe::view(roles::VAULT, "balance"),
        ScalarProbe::view(roles::VAULT, "performanceFeeGovernance"),
        ScalarProbe::view(roles::VAULT, "performanceFeeStrategist"),
    ]
}

fn fee_recipients() -> Vec<FeeRecipient> {
    vec![
        FeeRecipient::new(roles::TREASURY, scalars::GOVERNANCE_FEE),
        FeeRecipient::new(roles::STRATEGIST, scalars::STRATEGIST_FEE),
    ]
}

fn harvested_want() -> PolicyCheck {
    PolicyCheck::Harvested {
        event: crate::verifier::events::HARVESTED.to_string(),
        token: "want".to_string(),
        amount: AmountSource::Scalar(scalars::VAULT_BALANCE.to_string()),
    }
}

// =============================================================================
// AURA BAL STAKER
// =============================================================================

/// auraBal staking strategy.
///
/// Harvest compounds into want, distributes graviAura every time and bBbaUsd
/// only once the strategy's bbaUsd balance reaches `minBbaUsdHarvest`.
pub fn aura_bal_staker() -> HarvestPolicy {
    let mut scalar_probes = fee_probes();
    scalar_probes.push(ScalarProbe::view(roles::STRATEGY, "minBbaUsdHarvest"));

    HarvestPolicy {
        name: "aura_bal_staker".to_string(),
        description: "auraBal staker with threshold-gated bbaUsd flush".to_string(),
        entities: vec![
            RoleSpec::new(
                AURABAL_REWARDS,
                AddressSource::accessor(roles::STRATEGY, "AURABAL_REWARDS"),
            ),
            RoleSpec::new(
                BBA_USD_REWARDS,
                AddressSource::accessor(roles::STRATEGY, "BB_A_USD_REWARDS"),
            ),
            RoleSpec::new(
                GRAVIAURA_VAULT,
                AddressSource::accessor(roles::STRATEGY, "GRAVIAURA"),
            ),
            RoleSpec::new(
                B_BBA_USD_VAULT,
                AddressSource::accessor(roles::STRATEGY, "B_BB_A_USD"),
            ),
        ],
        tokens: vec![
            TokenSpec::on_strategy("want", "want"),
            TokenSpec::on_strategy("aura", "AURA"),
            TokenSpec::on_strategy("auraBal", "AURABAL"),
            TokenSpec::on_strategy("graviAura", "GRAVIAURA"),
            TokenSpec::on_strategy("bbaUsd", "BB_A_USD"),
            TokenSpec::on_strategy("bBbaUsd", "B_BB_A_USD"),
            TokenSpec::on_strategy("weth", "WETH"),
        ],
        scalars: scalar_probes,
        checks: vec![
            harvested_want(),
            PolicyCheck::Distributions(DistributionCheck {
                event: crate::verifier::events::TREE_DISTRIBUTION.to_string(),
                recipient: roles::BADGER_TREE.to_string(),
                matching: MatchingMode::TokenIdentity,
                fees: fee_recipients(),
                tokens: vec![
                    DistributionRule::gated("bBbaUsd", "bbaUsd"),
                    DistributionRule::always("graviAura"),
                ],
            }),
            PolicyCheck::ThresholdGate(ThresholdGate {
                token: "bbaUsd".to_string(),
                holder: roles::STRATEGY.to_string(),
                threshold: scalars::MIN_BBA_USD_HARVEST.to_string(),
                inflow: InflowFilter::from_role(BBA_USD_REWARDS),
            }),
            PolicyCheck::Dust {
                holder: roles::STRATEGY.to_string(),
                tokens: vec!["weth".to_string()],
            },
        ],
    }
}

// =============================================================================
// BVL OXD STAKER
// =============================================================================

/// bvlOXD staking strategy: one distribution, two routing tokens.
pub fn bvl_oxd_staker() -> HarvestPolicy {
    HarvestPolicy {
        name: "bvl_oxd_staker".to_string(),
        description: "bvlOXD staker emitting bvlOxd to the tree".to_string(),
        entities: Vec::new(),
        tokens: vec![
            TokenSpec::on_strategy("want", "want"),
            TokenSpec::on_strategy("oxd", "OXD"),
            TokenSpec::on_strategy("oxSolid", "OXSOLID"),
            TokenSpec::on_strategy("wftm", "WFTM"),
            TokenSpec::on_strategy("bvlOxd", "BVL_OXD"),
        ],
        scalars: fee_probes(),
        checks: vec![
            harvested_want(),
            PolicyCheck::Distributions(DistributionCheck {
                event: crate::verifier::events::TREE_DISTRIBUTION.to_string(),
                recipient: roles::BADGER_TREE.to_string(),
                matching: MatchingMode::TokenIdentity,
                fees: fee_recipients(),
                tokens: vec![DistributionRule::always("bvlOxd")],
            }),
            PolicyCheck::Dust {
                holder: roles::STRATEGY.to_string(),
                tokens: vec!["oxSolid".to_string(), "wftm".to_string()],
            },
        ],
    }
}

//! Snapshot engine tests against the in-memory chain.

use crate::verifier::diff::SnapshotDiff;
use crate::verifier::error::VerifierError;
use crate::verifier::registry::EntityRegistry;
use crate::verifier::snapshot::{Snapshot, SnapshotEngine};
use crate::verifier::test_support::{amt, AuraDeployment, MockChain};
use crate::verifier::tokens::{tokens_for, TokenSet};
use crate::verifier::variants::{aura_bal_staker, scalars};

fn resolved(d: &AuraDeployment, chain: &MockChain) -> (EntityRegistry, TokenSet) {
    let policy = aura_bal_staker();
    let registry = EntityRegistry::discover(
        chain,
        chain.head(),
        &policy.role_specs(d.vault.clone(), d.strategy.clone()),
    )
    .unwrap();
    let tokens = tokens_for(&policy, chain, chain.head(), &registry).unwrap();
    (registry, tokens)
}

#[test]
fn test_capture_is_one_batch_over_full_grid() {
    let d = AuraDeployment::new();
    let chain = d.chain(100);
    chain.set_balance(100, &d.gravi_aura, &d.tree, 1_234);
    let (registry, tokens) = resolved(&d, &chain);
    let policy = aura_bal_staker();

    let before = chain.batch_count();
    let snapshot = SnapshotEngine::new(&chain, &registry, &tokens)
        .with_scalars(&policy.scalars)
        .unwrap()
        .capture()
        .unwrap();

    assert_eq!(chain.batch_count(), before + 1);
    assert_eq!(snapshot.block(), 100);
    assert_eq!(snapshot.pair_count(), registry.len() * tokens.len());
    assert_eq!(snapshot.balance("badgerTree", "graviAura"), Some(&amt(1_234)));
    assert_eq!(snapshot.scalar(scalars::GOVERNANCE_FEE), Some(&amt(1_000)));
    assert_eq!(snapshot.scalar(scalars::MIN_BBA_USD_HARVEST), Some(&amt(1_000)));
}

#[test]
fn test_capture_at_reads_pinned_block() {
    let d = AuraDeployment::new();
    let chain = d.chain(100);
    chain.set_balance(100, &d.bba_usd, &d.strategy, 400);
    chain.set_balance(101, &d.bba_usd, &d.strategy, 600);
    chain.mine();
    let (registry, tokens) = resolved(&d, &chain);
    let engine = SnapshotEngine::new(&chain, &registry, &tokens);

    let at_100 = engine.capture_at(100).unwrap();
    let at_101 = engine.capture_at(101).unwrap();
    assert_eq!(at_100.balance("strategy", "bbaUsd"), Some(&amt(400)));
    assert_eq!(at_101.balance("strategy", "bbaUsd"), Some(&amt(600)));
}

#[test]
fn test_back_to_back_captures_have_zero_deltas() {
    let d = AuraDeployment::new();
    let chain = d.chain(100);
    chain.set_balance(50, &d.want, &d.vault, 10_000);
    chain.set_balance(60, &d.gravi_aura, &d.treasury, 77);
    let (registry, tokens) = resolved(&d, &chain);
    let engine = SnapshotEngine::new(&chain, &registry, &tokens);

    let first = engine.capture().unwrap();
    let second = engine.capture().unwrap();
    let diff = SnapshotDiff::new(&first, &second).unwrap();
    assert!(diff.is_unchanged());
    assert_eq!(first.fingerprint(), second.fingerprint());
}

#[test]
fn test_failed_read_yields_no_snapshot() {
    let d = AuraDeployment::new();
    let chain = d.chain(100);
    let (registry, tokens) = resolved(&d, &chain);
    chain.revert_on("weth.balanceOf(treasury)");
    let result = SnapshotEngine::new(&chain, &registry, &tokens).capture();
    assert!(matches!(
        result,
        Err(VerifierError::SnapshotRead { ref call, .. }) if call == "weth.balanceOf(treasury)"
    ));
}

#[test]
fn test_restricted_holders() {
    let d = AuraDeployment::new();
    let chain = d.chain(100);
    let (registry, tokens) = resolved(&d, &chain);
    let snapshot = SnapshotEngine::new(&chain, &registry, &tokens)
        .with_holders(&["strategy", "badgerTree"])
        .unwrap()
        .capture()
        .unwrap();
    assert_eq!(snapshot.pair_count(), 2 * tokens.len());
    assert!(!snapshot.contains("treasury", "want"));

    assert!(matches!(
        SnapshotEngine::new(&chain, &registry, &tokens).with_holders(&["rewardsPool"]),
        Err(VerifierError::UnknownRole { .. })
    ));
}

#[test]
fn test_snapshot_json_is_flat_and_exact() {
    let huge = crate::verifier::amount::parse_amount("340282366920938463463374607431768211457").unwrap();
    let snapshot = Snapshot::new(7)
        .with_balance("vault", "want", huge.clone())
        .with_scalar("vault.balance", amt(3));
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["balances"][0]["entity"], "vault");
    assert_eq!(json["balances"][0]["amount"], "340282366920938463463374607431768211457");

    let back: Snapshot = serde_json::from_value(json).unwrap();
    assert_eq!(back.balance("vault", "want"), Some(&huge));
    assert_eq!(back.fingerprint(), snapshot.fingerprint());
}

#[test]
fn test_duplicate_entries_rejected_on_load() {
    let text = r#"{
        "block": 1,
        "captured_at": "2024-01-01T00:00:00Z",
        "balances": [
            {"entity": "vault", "token": "want", "amount": "1"},
            {"entity": "vault", "token": "want", "amount": "2"}
        ]
    }"#;
    assert!(serde_json::from_str::<Snapshot>(text).is_err());
}

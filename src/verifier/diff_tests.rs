//! Snapshot differ tests.

use crate::verifier::amount::Delta;
use crate::verifier::diff::{delta, value, SnapshotDiff};
use crate::verifier::error::{SnapshotSide, VerifierError};
use crate::verifier::snapshot::Snapshot;
use crate::verifier::test_support::amt;

#[test]
fn test_positive_and_negative_deltas() {
    let before = Snapshot::new(1)
        .with_balance("badgerTree", "graviAura", amt(100))
        .with_balance("strategy", "bbaUsd", amt(900));
    let after = Snapshot::new(2)
        .with_balance("badgerTree", "graviAura", amt(130))
        .with_balance("strategy", "bbaUsd", amt(0));

    assert_eq!(delta(&before, &after, "badgerTree", "graviAura").unwrap(), Delta::from(30));
    assert_eq!(delta(&before, &after, "strategy", "bbaUsd").unwrap(), Delta::from(-900));
    assert_eq!(
        *value(&before, SnapshotSide::Before, "strategy", "bbaUsd").unwrap(),
        amt(900)
    );
}

#[test]
fn test_missing_pair_is_never_zero() {
    let before = Snapshot::new(1).with_balance("strategy", "want", amt(5));
    let after = Snapshot::new(2).with_balance("strategy", "want", amt(5));
    match delta(&before, &after, "treasury", "want") {
        Err(VerifierError::MissingPair { entity, token, side }) => {
            assert_eq!(entity, "treasury");
            assert_eq!(token, "want");
            assert_eq!(side, SnapshotSide::Before);
        }
        other => panic!("expected MissingPair, got {:?}", other),
    }
}

#[test]
fn test_asymmetric_coverage_rejected() {
    let before = Snapshot::new(1)
        .with_balance("strategy", "want", amt(5))
        .with_balance("strategy", "weth", amt(0));
    let after = Snapshot::new(2)
        .with_balance("strategy", "want", amt(5))
        .with_balance("vault", "want", amt(1));
    match SnapshotDiff::new(&before, &after) {
        Err(VerifierError::CoverageMismatch {
            only_before,
            only_after,
        }) => {
            assert_eq!(only_before, vec!["strategy/weth".to_string()]);
            assert_eq!(only_after, vec!["vault/want".to_string()]);
        }
        other => panic!("expected CoverageMismatch, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_reversed_snapshots_rejected() {
    let before = Snapshot::new(10).with_balance("strategy", "want", amt(5));
    let after = Snapshot::new(9).with_balance("strategy", "want", amt(5));
    assert!(matches!(
        SnapshotDiff::new(&before, &after),
        Err(VerifierError::OrderingViolation { .. })
    ));
}

#[test]
fn test_changed_lists_only_moved_pairs() {
    let before = Snapshot::new(1)
        .with_balance("strategy", "want", amt(5))
        .with_balance("treasury", "graviAura", amt(0))
        .with_scalar("vault.balance", amt(100));
    let after = Snapshot::new(2)
        .with_balance("strategy", "want", amt(5))
        .with_balance("treasury", "graviAura", amt(7))
        .with_scalar("vault.balance", amt(90));
    let diff = SnapshotDiff::new(&before, &after).unwrap();

    let changed = diff.changed();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].0, "treasury");
    assert_eq!(changed[0].2, Delta::from(7));
    assert!(!diff.is_unchanged());
    assert_eq!(diff.scalar_delta("vault.balance").unwrap(), Delta::from(-10));
    assert!(matches!(
        diff.after_scalar("strategy.minBbaUsdHarvest"),
        Err(VerifierError::MissingScalar { side: SnapshotSide::After, .. })
    ));

    let rows = diff.rows();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r.delta == "+7"));
    assert!(rows.iter().any(|r| r.delta == "0"));
}

#[test]
fn test_uint256_scale_deltas_are_exact() {
    let huge = crate::verifier::amount::parse_amount(
        "115792089237316195423570985008687907853269984665640564039457584007913129639935",
    )
    .unwrap();
    let before = Snapshot::new(1).with_balance("vault", "want", huge.clone() - amt(1));
    let after = Snapshot::new(2).with_balance("vault", "want", huge);
    assert_eq!(delta(&before, &after, "vault", "want").unwrap(), Delta::from(1));
}

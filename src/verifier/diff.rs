//! Snapshot Differ
//!
//! Pure functions over a before/after pair. No I/O.
//!
//! A pair that is missing from either snapshot is an error, never an implicit
//! zero: silently defaulting would let a mis-declared token set pass checks it
//! never actually measured.

use crate::verifier::amount::{signed_delta, Amount, Delta};
use crate::verifier::error::{SnapshotSide, VerifierError, VerifierResult};
use crate::verifier::snapshot::Snapshot;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Raw value of `(entity, token)` in one snapshot.
pub fn value<'s>(
    snapshot: &'s Snapshot,
    side: SnapshotSide,
    entity: &str,
    token: &str,
) -> VerifierResult<&'s Amount> {
    snapshot
        .balance(entity, token)
        .ok_or_else(|| VerifierError::MissingPair {
            entity: entity.to_string(),
            token: token.to_string(),
            side,
        })
}

/// `after[entity, token] - before[entity, token]`.
pub fn delta(before: &Snapshot, after: &Snapshot, entity: &str, token: &str) -> VerifierResult<Delta> {
    let b = value(before, SnapshotSide::Before, entity, token)?;
    let a = value(after, SnapshotSide::After, entity, token)?;
    Ok(signed_delta(b, a))
}

/// One row of the comparison table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRow {
    pub entity: String,
    pub token: String,
    #[serde(with = "crate::verifier::amount::decimal")]
    pub before: Amount,
    #[serde(with = "crate::verifier::amount::decimal")]
    pub after: Amount,
    pub delta: String,
}

/// A validated before/after pair.
///
/// Construction checks symmetric coverage and block ordering, so every query
/// afterwards only fails for pairs that were never tracked.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotDiff<'s> {
    before: &'s Snapshot,
    after: &'s Snapshot,
}

impl<'s> SnapshotDiff<'s> {
    pub fn new(before: &'s Snapshot, after: &'s Snapshot) -> VerifierResult<Self> {
        if after.block() < before.block() {
            return Err(VerifierError::OrderingViolation {
                reason: format!(
                    "after snapshot (block {}) precedes before snapshot (block {})",
                    after.block(),
                    before.block()
                ),
            });
        }

        let only_before: Vec<String> = before
            .pairs()
            .filter(|(e, t, _)| !after.contains(e, t))
            .map(|(e, t, _)| format!("{}/{}", e, t))
            .collect();
        let only_after: Vec<String> = after
            .pairs()
            .filter(|(e, t, _)| !before.contains(e, t))
            .map(|(e, t, _)| format!("{}/{}", e, t))
            .collect();
        if !only_before.is_empty() || !only_after.is_empty() {
            return Err(VerifierError::CoverageMismatch {
                only_before,
                only_after,
            });
        }

        debug!(
            pairs = before.pair_count(),
            from = before.block(),
            to = after.block(),
            "Snapshot diff ready"
        );
        Ok(Self { before, after })
    }

    pub fn before(&self) -> &'s Snapshot {
        self.before
    }

    pub fn after(&self) -> &'s Snapshot {
        self.after
    }

    pub fn delta(&self, entity: &str, token: &str) -> VerifierResult<Delta> {
        delta(self.before, self.after, entity, token)
    }

    pub fn before_value(&self, entity: &str, token: &str) -> VerifierResult<&'s Amount> {
        value(self.before, SnapshotSide::Before, entity, token)
    }

    pub fn after_value(&self, entity: &str, token: &str) -> VerifierResult<&'s Amount> {
        value(self.after, SnapshotSide::After, entity, token)
    }

    pub fn before_scalar(&self, key: &str) -> VerifierResult<&'s Amount> {
        self.before
            .scalar(key)
            .ok_or_else(|| VerifierError::MissingScalar {
                key: key.to_string(),
                side: SnapshotSide::Before,
            })
    }

    pub fn after_scalar(&self, key: &str) -> VerifierResult<&'s Amount> {
        self.after
            .scalar(key)
            .ok_or_else(|| VerifierError::MissingScalar {
                key: key.to_string(),
                side: SnapshotSide::After,
            })
    }

    pub fn scalar_delta(&self, key: &str) -> VerifierResult<Delta> {
        Ok(signed_delta(self.before_scalar(key)?, self.after_scalar(key)?))
    }

    /// Every tracked pair with its before, after and delta.
    pub fn rows(&self) -> Vec<DeltaRow> {
        self.before
            .pairs()
            .filter_map(|(entity, token, before)| {
                let after = self.after.balance(entity, token)?;
                Some(DeltaRow {
                    entity: entity.to_string(),
                    token: token.to_string(),
                    before: before.clone(),
                    after: after.clone(),
                    delta: crate::verifier::amount::format_delta(&signed_delta(before, after)),
                })
            })
            .collect()
    }

    /// Pairs whose balance moved.
    pub fn changed(&self) -> Vec<(String, String, Delta)> {
        self.before
            .pairs()
            .filter_map(|(entity, token, before)| {
                let after = self.after.balance(entity, token)?;
                let d = signed_delta(before, after);
                (!d.is_zero()).then(|| (entity.to_string(), token.to_string(), d))
            })
            .collect()
    }

    pub fn is_unchanged(&self) -> bool {
        self.changed().is_empty()
    }
}

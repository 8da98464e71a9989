//! Harvest Session
//!
//! Runs one verification pass, strictly sequentially:
//!
//! ```text
//! capture(before) -> driver.execute() -> capture(after) -> diff -> check
//! ```
//!
//! The session owns the bracketing rule: the before snapshot must be taken at a
//! block strictly earlier than the one the operation landed in, and the after
//! snapshot at or after it.
//!
//! Bracketing is per block. When a mined harvest shares its block with other
//! transactions, their balance effects fall inside the bracket too and can
//! pass or fail checks on their own; [`block_is_shared`] reports this case.

use crate::verifier::address::Address;
use crate::verifier::chain::ChainReader;
use crate::verifier::checker::InvariantChecker;
use crate::verifier::error::{VerifierError, VerifierResult};
use crate::verifier::events::EventLog;
use crate::verifier::policy::HarvestPolicy;
use crate::verifier::registry::EntityRegistry;
use crate::verifier::report::VerificationReport;
use crate::verifier::snapshot::{Snapshot, SnapshotEngine};
use crate::verifier::tokens::{tokens_for, TokenSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What the operation under test produced.
#[derive(Debug, Clone, Default)]
pub struct HarvestOutcome {
    pub events: EventLog,
    /// Block the operation was included in, when the driver knows it.
    pub block: Option<u64>,
}

/// Triggers the operation under test.
pub trait HarvestDriver {
    fn execute(&mut self) -> VerifierResult<HarvestOutcome>;
}

/// Check `before ≺ operation ≼ after`.
pub fn check_ordering(before: &Snapshot, operation: Option<u64>, after: &Snapshot) -> VerifierResult<()> {
    match operation {
        Some(block) if before.block() >= block => Err(VerifierError::OrderingViolation {
            reason: format!(
                "before snapshot at block {} does not precede operation at block {}",
                before.block(),
                block
            ),
        }),
        Some(block) if after.block() < block => Err(VerifierError::OrderingViolation {
            reason: format!(
                "after snapshot at block {} precedes operation at block {}",
                after.block(),
                block
            ),
        }),
        None if after.block() < before.block() => Err(VerifierError::OrderingViolation {
            reason: format!(
                "after snapshot at block {} precedes before snapshot at block {}",
                after.block(),
                before.block()
            ),
        }),
        _ => Ok(()),
    }
}

/// Whether `block` holds transactions besides the operation under test.
/// Logs a warning when it does; an unknown count is treated as not shared.
pub fn block_is_shared<R: ChainReader + ?Sized>(reader: &R, block: u64) -> bool {
    match reader.block_transaction_count(block) {
        Ok(Some(count)) if count > 1 => {
            warn!(
                block,
                transactions = count,
                "Harvest block holds other transactions; their effects are inside the bracket"
            );
            true
        }
        Ok(_) => false,
        Err(e) => {
            debug!(block, error = %e, "Block transaction count unavailable");
            false
        }
    }
}

/// A snapshot together with the deployment it was taken against, so it can be
/// re-verified offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub policy: String,
    pub registry: EntityRegistry,
    pub tokens: TokenSet,
    pub snapshot: Snapshot,
}

/// Verify two stored captures against `policy`.
pub fn verify_records(
    policy: &HarvestPolicy,
    before: &CaptureRecord,
    after: &CaptureRecord,
    events: &EventLog,
) -> VerifierResult<VerificationReport> {
    for record in [before, after] {
        if record.policy != policy.name {
            return Err(VerifierError::config(format!(
                "capture at block {} was taken for policy '{}', not '{}'",
                record.snapshot.block(),
                record.policy,
                policy.name
            )));
        }
    }
    if before.registry != after.registry || before.tokens != after.tokens {
        return Err(VerifierError::config(
            "before and after captures resolve different deployments",
        ));
    }
    check_ordering(&before.snapshot, None, &after.snapshot)?;
    InvariantChecker::new(policy, &before.registry, &before.tokens)?.check(
        &before.snapshot,
        &after.snapshot,
        events,
    )
}

/// A resolved deployment bound to one policy.
pub struct HarvestSession<'a, R: ChainReader> {
    reader: &'a R,
    policy: &'a HarvestPolicy,
    registry: EntityRegistry,
    tokens: TokenSet,
}

impl<'a, R: ChainReader> HarvestSession<'a, R> {
    /// Discover roles and tokens for the deployment at the latest block.
    pub fn open(
        reader: &'a R,
        policy: &'a HarvestPolicy,
        vault: Address,
        strategy: Address,
    ) -> VerifierResult<Self> {
        let block = reader.block_number()?;
        Self::open_at(reader, policy, vault, strategy, block)
    }

    /// Discover roles and tokens as of `block`.
    pub fn open_at(
        reader: &'a R,
        policy: &'a HarvestPolicy,
        vault: Address,
        strategy: Address,
        block: u64,
    ) -> VerifierResult<Self> {
        policy.validate()?;
        let registry = EntityRegistry::discover(reader, block, &policy.role_specs(vault, strategy))?;
        let tokens = tokens_for(policy, reader, block, &registry)?;
        info!(
            policy = %policy.name,
            roles = registry.len(),
            tokens = tokens.len(),
            block,
            "Harvest session opened"
        );
        Ok(Self::with_resolved(reader, policy, registry, tokens))
    }

    /// Session over an already resolved registry and token set.
    pub fn with_resolved(
        reader: &'a R,
        policy: &'a HarvestPolicy,
        registry: EntityRegistry,
        tokens: TokenSet,
    ) -> Self {
        Self {
            reader,
            policy,
            registry,
            tokens,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }

    pub fn engine(&self) -> VerifierResult<SnapshotEngine<'_, R>> {
        SnapshotEngine::new(self.reader, &self.registry, &self.tokens).with_scalars(&self.policy.scalars)
    }

    pub fn checker(&self) -> VerifierResult<InvariantChecker<'_>> {
        InvariantChecker::new(self.policy, &self.registry, &self.tokens)
    }

    pub fn capture(&self) -> VerifierResult<Snapshot> {
        self.engine()?.capture()
    }

    pub fn capture_at(&self, block: u64) -> VerifierResult<Snapshot> {
        self.engine()?.capture_at(block)
    }

    /// Wrap `snapshot` with this session's deployment for offline use.
    pub fn record(&self, snapshot: Snapshot) -> CaptureRecord {
        CaptureRecord {
            policy: self.policy.name.clone(),
            registry: self.registry.clone(),
            tokens: self.tokens.clone(),
            snapshot,
        }
    }

    /// Bracket `driver` with snapshots and verify the result.
    pub fn run<D: HarvestDriver>(&self, driver: &mut D) -> VerifierResult<VerificationReport> {
        let engine = self.engine()?;
        let checker = self.checker()?;

        let before = engine.capture()?;
        let outcome = driver.execute()?;
        let after = engine.capture()?;

        check_ordering(&before, outcome.block, &after)?;
        checker.check(&before, &after, &outcome.events)
    }

    /// Verify an operation already mined in `block`: state at `block - 1` is the
    /// before side, state at `block` the after side. Other transactions in
    /// `block` are inside the bracket as well.
    pub fn verify_mined(&self, block: u64, events: &EventLog) -> VerifierResult<VerificationReport> {
        if block == 0 {
            return Err(VerifierError::OrderingViolation {
                reason: "operation in genesis block has no prior state".into(),
            });
        }
        block_is_shared(self.reader, block);
        let engine = self.engine()?;
        let before = engine.capture_at(block - 1)?;
        let after = engine.capture_at(block)?;
        check_ordering(&before, Some(block), &after)?;
        self.checker()?.check(&before, &after, events)
    }

    /// Verify previously captured snapshots.
    pub fn verify(
        &self,
        before: &Snapshot,
        after: &Snapshot,
        events: &EventLog,
    ) -> VerifierResult<VerificationReport> {
        check_ordering(before, None, after)?;
        self.checker()?.check(before, after, events)
    }
}

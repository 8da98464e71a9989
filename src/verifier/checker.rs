//! Invariant Checker
//!
//! One generic checker driven by a [`HarvestPolicy`]. Checks run in policy
//! order and the first failure aborts the pass: a verification either returns a
//! full [`VerificationReport`] or exactly one error.
//!
//! # Distribution matching
//!
//! Events are paired with expected tokens by the token address the event
//! reports. Positional pairing is used when the policy asks for it or when an
//! event carries no `token` field. Either way the event's token must equal the
//! paired label's address.
//!
//! # Threshold gating
//!
//! A gated token accumulates on its holder until `before + inflow` reaches the
//! threshold, then the whole balance is flushed. Distributions gated by that
//! token are only expected in a flushing harvest.

use crate::verifier::address::Address;
use crate::verifier::amount::{format_delta, magnitude, to_signed, Amount, Delta};
use crate::verifier::diff::SnapshotDiff;
use crate::verifier::error::{InvariantViolation, SnapshotSide, VerifierError, VerifierResult};
use crate::verifier::events::{EventLog, EventRecord};
use crate::verifier::policy::{
    AmountSource, DistributionCheck, HarvestPolicy, MatchingMode, PolicyCheck, RewardInflow,
    ScalarExpect, ThresholdGate,
};
use crate::verifier::registry::EntityRegistry;
use crate::verifier::report::{CheckOutcome, VerificationReport};
use crate::verifier::snapshot::Snapshot;
use crate::verifier::tokens::TokenSet;
use num_traits::{Signed, Zero};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Evaluated state of a threshold gate for one harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateState {
    pub before: Amount,
    pub inflow: Amount,
    pub threshold: Amount,
    pub after: Amount,
}

impl GateState {
    /// Balance available to the harvest before any flush.
    pub fn total(&self) -> Amount {
        &self.before + &self.inflow
    }

    /// Whether this harvest must flush the holder's balance. An empty balance
    /// never flushes, even against a zero threshold.
    pub fn flushes(&self) -> bool {
        let total = self.total();
        !total.is_zero() && total >= self.threshold
    }

    /// Balance the holder must end with.
    pub fn expected_after(&self) -> Amount {
        if self.flushes() {
            Amount::zero()
        } else {
            self.total()
        }
    }
}

fn violation(check: &str, message: impl Into<String>) -> InvariantViolation {
    InvariantViolation::new(check, message)
}

// =============================================================================
// INVARIANT CHECKER
// =============================================================================

/// Evaluates one policy against snapshot pairs and event logs.
pub struct InvariantChecker<'a> {
    policy: &'a HarvestPolicy,
    registry: &'a EntityRegistry,
    tokens: &'a TokenSet,
    inflow_overrides: HashMap<String, Box<dyn RewardInflow + 'a>>,
}

impl<'a> InvariantChecker<'a> {
    /// Validate the policy and make sure every role and label it references
    /// resolves in this deployment.
    pub fn new(
        policy: &'a HarvestPolicy,
        registry: &'a EntityRegistry,
        tokens: &'a TokenSet,
    ) -> VerifierResult<Self> {
        policy.validate()?;
        for spec in &policy.tokens {
            tokens.get(&spec.label)?;
        }
        for spec in &policy.entities {
            registry.resolve(&spec.role)?;
        }
        Ok(Self {
            policy,
            registry,
            tokens,
            inflow_overrides: HashMap::new(),
        })
    }

    /// Replace the policy's inflow filter for the gate on `token`.
    pub fn with_inflow(mut self, token: &str, predicate: impl RewardInflow + 'a) -> Self {
        self.inflow_overrides
            .insert(token.to_string(), Box::new(predicate));
        self
    }

    pub fn policy(&self) -> &HarvestPolicy {
        self.policy
    }

    /// Run every check in order.
    pub fn check(
        &self,
        before: &Snapshot,
        after: &Snapshot,
        events: &EventLog,
    ) -> VerifierResult<VerificationReport> {
        let diff = SnapshotDiff::new(before, after)?;
        let mut outcomes = Vec::with_capacity(self.policy.checks.len());

        for check in &self.policy.checks {
            let result = match check {
                PolicyCheck::Harvested {
                    event,
                    token,
                    amount,
                } => self.check_harvested(&diff, events, event, token, amount),
                PolicyCheck::Distributions(d) => self.check_distributions(&diff, events, d),
                PolicyCheck::ThresholdGate(g) => self.check_threshold(&diff, events, g),
                PolicyCheck::Dust { holder, tokens } => self.check_dust(&diff, holder, tokens),
                PolicyCheck::Conservation {
                    token,
                    source,
                    recipients,
                } => self.check_conservation(&diff, token, source, recipients),
                PolicyCheck::Gained {
                    entity,
                    token,
                    unless_zero,
                } => self.check_gained(&diff, entity, token, unless_zero.as_deref()),
                PolicyCheck::Scalar { key, at, expect } => {
                    self.check_scalar(&diff, key, *at, expect)
                }
            };

            match result {
                Ok(summary) => {
                    debug!(check = check.name(), %summary, "Check passed");
                    outcomes.push(CheckOutcome {
                        name: check.name().to_string(),
                        summary,
                    });
                }
                Err(err) => {
                    if let Some(v) = err.violation() {
                        warn!(policy = %self.policy.name, check = check.name(), "{}", v);
                    } else {
                        warn!(policy = %self.policy.name, check = check.name(), error = %err, "Check aborted");
                    }
                    return Err(err);
                }
            }
        }

        info!(
            policy = %self.policy.name,
            checks = outcomes.len(),
            from = before.block(),
            to = after.block(),
            "Harvest verified"
        );
        Ok(VerificationReport::new(&self.policy.name, &diff, outcomes))
    }

    // =========================================================================
    // HARVESTED
    // =========================================================================

    fn check_harvested(
        &self,
        diff: &SnapshotDiff<'_>,
        events: &EventLog,
        kind: &str,
        token: &str,
        source: &AmountSource,
    ) -> VerifierResult<String> {
        let records: Vec<&EventRecord> = events.of_kind(kind).collect();
        if records.len() != 1 {
            return Err(violation("harvested.count", format!("expected exactly one {} event", kind))
                .values(1, records.len())
                .into());
        }
        let record = records[0];

        let want = self.tokens.get(token)?;
        let reported = record.token()?;
        if reported != *want {
            return Err(violation("harvested.token", format!("{} event reports the wrong token", kind))
                .token(token)
                .values(want, &reported)
                .into());
        }

        let expected = match source {
            AmountSource::Scalar(key) => diff.scalar_delta(key)?,
            AmountSource::Balance { entity, token } => diff.delta(entity, token)?,
        };
        let amount = record.amount()?;
        if to_signed(&amount) != expected {
            return Err(violation("harvested.amount", format!("{} amount does not match measured delta", kind))
                .token(token)
                .values(format_delta(&expected), &amount)
                .into());
        }
        Ok(format!("{} {} of {}", kind, amount, token))
    }

    // =========================================================================
    // DISTRIBUTIONS
    // =========================================================================

    fn check_distributions(
        &self,
        diff: &SnapshotDiff<'_>,
        events: &EventLog,
        check: &DistributionCheck,
    ) -> VerifierResult<String> {
        let mut expected: Vec<&str> = Vec::with_capacity(check.tokens.len());
        for rule in &check.tokens {
            let included = match rule.gated_by {
                Some(ref gate_token) => {
                    let gate = self.policy.threshold_gate(gate_token).ok_or_else(|| {
                        VerifierError::config(format!("no threshold gate for '{}'", gate_token))
                    })?;
                    self.gate_state(diff, events, gate)?.flushes()
                }
                None => true,
            };
            if included {
                expected.push(rule.token.as_str());
            }
        }

        let records: Vec<&EventRecord> = events.of_kind(&check.event).collect();
        if records.len() != expected.len() {
            return Err(violation(
                "distribution.count",
                format!("{} events do not match expected [{}]", check.event, expected.join(", ")),
            )
            .entity(&check.recipient)
            .values(expected.len(), records.len())
            .into());
        }

        let pairs = self.match_distributions(check, &expected, &records)?;
        for (label, record) in &pairs {
            self.check_one_distribution(diff, check, label, record)?;
        }

        Ok(format!(
            "{} distribution(s) to {} [{}]",
            pairs.len(),
            check.recipient,
            expected.join(", ")
        ))
    }

    fn match_distributions<'e>(
        &self,
        check: &DistributionCheck,
        expected: &[&'e str],
        records: &[&'e EventRecord],
    ) -> VerifierResult<Vec<(&'e str, &'e EventRecord)>> {
        let addresses: Vec<&Address> = expected
            .iter()
            .map(|label| self.tokens.get(label))
            .collect::<VerifierResult<_>>()?;
        let mut used = vec![false; expected.len()];
        let mut pairs = Vec::with_capacity(records.len());

        for (position, record) in records.iter().enumerate() {
            let slot = match check.matching {
                MatchingMode::TokenIdentity if record.has_field("token") => {
                    let reported = record.token()?;
                    addresses
                        .iter()
                        .enumerate()
                        .position(|(i, a)| !used[i] && **a == reported)
                        .ok_or_else(|| {
                            violation(
                                "distribution.token",
                                format!("{} reports a token that is not expected", check.event),
                            )
                            .entity(&check.recipient)
                            .values(expected.join(", "), &reported)
                        })?
                }
                _ => {
                    if record.has_field("token") {
                        let reported = record.token()?;
                        if reported != *addresses[position] {
                            return Err(violation(
                                "distribution.token",
                                format!("{} #{} reports the wrong token", check.event, position),
                            )
                            .entity(&check.recipient)
                            .token(expected[position])
                            .values(addresses[position], &reported)
                            .into());
                        }
                    }
                    position
                }
            };

            if used[slot] {
                return Err(violation(
                    "distribution.token",
                    format!("{} for {} reported twice", check.event, expected[slot]),
                )
                .entity(&check.recipient)
                .token(expected[slot])
                .into());
            }
            used[slot] = true;
            pairs.push((expected[slot], *record));
        }
        Ok(pairs)
    }

    fn check_one_distribution(
        &self,
        diff: &SnapshotDiff<'_>,
        check: &DistributionCheck,
        label: &str,
        record: &EventRecord,
    ) -> VerifierResult<()> {
        let recipient_delta = diff.delta(&check.recipient, label)?;
        if !recipient_delta.is_positive() {
            return Err(violation("distribution.recipient_gain", "recipient balance did not increase")
                .entity(&check.recipient)
                .token(label)
                .values("> 0", format_delta(&recipient_delta))
                .into());
        }

        for fee in &check.fees {
            let rate = diff.before_scalar(&fee.rate)?;
            if rate.is_zero() {
                continue;
            }
            let fee_delta = diff.delta(&fee.role, label)?;
            if !fee_delta.is_positive() {
                return Err(violation(
                    "distribution.fee",
                    format!("{} is nonzero but fee recipient gained nothing", fee.rate),
                )
                .entity(&fee.role)
                .token(label)
                .values("> 0", format_delta(&fee_delta))
                .into());
            }
        }

        let amount = record.amount()?;
        if to_signed(&amount) != recipient_delta {
            return Err(violation("distribution.event_amount", "event amount differs from recipient delta")
                .entity(&check.recipient)
                .token(label)
                .values(format_delta(&recipient_delta), &amount)
                .into());
        }
        Ok(())
    }

    // =========================================================================
    // THRESHOLD GATE
    // =========================================================================

    /// Evaluate a gate: before balance, summed inflow, threshold and after.
    pub fn gate_state(
        &self,
        diff: &SnapshotDiff<'_>,
        events: &EventLog,
        gate: &ThresholdGate,
    ) -> VerifierResult<GateState> {
        let inflow = match self.inflow_overrides.get(&gate.token) {
            Some(predicate) => sum_inflow(events, predicate.as_ref())?,
            None => {
                let token = self.tokens.get(&gate.token)?;
                let holder = self.registry.resolve(&gate.holder)?;
                let predicate = gate.inflow.bind(self.registry, token, holder)?;
                sum_inflow(events, &predicate)?
            }
        };

        Ok(GateState {
            before: diff.before_value(&gate.holder, &gate.token)?.clone(),
            inflow,
            threshold: diff.before_scalar(&gate.threshold)?.clone(),
            after: diff.after_value(&gate.holder, &gate.token)?.clone(),
        })
    }

    fn check_threshold(
        &self,
        diff: &SnapshotDiff<'_>,
        events: &EventLog,
        gate: &ThresholdGate,
    ) -> VerifierResult<String> {
        let state = self.gate_state(diff, events, gate)?;
        let expected = state.expected_after();
        if state.after != expected {
            let (name, message) = if state.flushes() {
                ("threshold.flush", "balance reached threshold but was not flushed")
            } else {
                ("threshold.accumulate", "balance below threshold did not accumulate")
            };
            return Err(violation(
                name,
                format!(
                    "{} (before {}, inflow {}, threshold {})",
                    message, state.before, state.inflow, state.threshold
                ),
            )
            .entity(&gate.holder)
            .token(&gate.token)
            .values(&expected, &state.after)
            .into());
        }
        Ok(format!(
            "{} on {}: {} + {} vs {} -> {}",
            gate.token,
            gate.holder,
            state.before,
            state.inflow,
            state.threshold,
            if state.flushes() { "flushed" } else { "accumulated" }
        ))
    }

    // =========================================================================
    // DUST / CONSERVATION / GAINED / SCALAR
    // =========================================================================

    fn check_dust(
        &self,
        diff: &SnapshotDiff<'_>,
        holder: &str,
        tokens: &[String],
    ) -> VerifierResult<String> {
        for token in tokens {
            let residual = diff.after_value(holder, token)?;
            if !residual.is_zero() {
                return Err(violation("dust", "routing token left on holder")
                    .entity(holder)
                    .token(token)
                    .values(0, residual)
                    .into());
            }
        }
        Ok(format!("{} clean of [{}]", holder, tokens.join(", ")))
    }

    fn check_conservation(
        &self,
        diff: &SnapshotDiff<'_>,
        token: &str,
        source: &str,
        recipients: &[String],
    ) -> VerifierResult<String> {
        let source_delta = diff.delta(source, token)?;
        let released = if source_delta.is_negative() {
            magnitude(&source_delta)
        } else {
            Amount::zero()
        };

        let mut received = Amount::zero();
        for recipient in recipients {
            let d: Delta = diff.delta(recipient, token)?;
            if d.is_positive() {
                received += magnitude(&d);
            }
        }

        if received > released {
            return Err(violation("conservation", "recipients gained more than the source released")
                .entity(source)
                .token(token)
                .values(format!("<= {}", released), &received)
                .into());
        }
        Ok(format!("{} {} released, {} received", token, released, received))
    }

    fn check_gained(
        &self,
        diff: &SnapshotDiff<'_>,
        entity: &str,
        token: &str,
        unless_zero: Option<&str>,
    ) -> VerifierResult<String> {
        if let Some(key) = unless_zero {
            if diff.before_scalar(key)?.is_zero() {
                return Ok(format!("{} {} skipped ({} is zero)", entity, token, key));
            }
        }
        let d = diff.delta(entity, token)?;
        if !d.is_positive() {
            return Err(violation("gained", "entity did not gain token")
                .entity(entity)
                .token(token)
                .values("> 0", format_delta(&d))
                .into());
        }
        Ok(format!("{} gained {} {}", entity, format_delta(&d), token))
    }

    fn check_scalar(
        &self,
        diff: &SnapshotDiff<'_>,
        key: &str,
        at: SnapshotSide,
        expect: &ScalarExpect,
    ) -> VerifierResult<String> {
        let value = match at {
            SnapshotSide::Before => diff.before_scalar(key)?,
            SnapshotSide::After => diff.after_scalar(key)?,
        };
        let (ok, wanted) = match expect {
            ScalarExpect::Equals(target) => (value == target, target.to_string()),
            ScalarExpect::Positive => (!value.is_zero(), "> 0".to_string()),
            ScalarExpect::Zero => (value.is_zero(), "0".to_string()),
        };
        if !ok {
            return Err(violation("scalar", format!("{} at {} out of range", key, at))
                .values(wanted, value)
                .into());
        }
        Ok(format!("{} = {} ({})", key, value, at))
    }
}

/// Sum of amounts of every record the predicate accepts.
pub fn sum_inflow(events: &EventLog, predicate: &dyn RewardInflow) -> VerifierResult<Amount> {
    let mut total = Amount::zero();
    for record in events.records() {
        if predicate.is_reward_inflow(record) {
            total += record.amount()?;
        }
    }
    Ok(total)
}

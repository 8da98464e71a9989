//! Verifier Error Taxonomy
//!
//! Every failure in the verifier is fatal for the verification pass it occurs in.
//! Nothing here is retried: read failures, misconfigured variants and invariant
//! violations all surface to the caller unchanged.
//!
//! # Classes
//!
//! - **Read**: `SnapshotRead` (a balance, scalar or accessor read failed or reverted)
//! - **Resolution**: `UnknownRole`, `UnresolvedToken` (policy references something
//!   the registry or token set cannot provide)
//! - **Lookup**: `MissingPair`, `MissingScalar`, `CoverageMismatch` (snapshot shape)
//! - **Ordering**: `OrderingViolation` (before/operation/after bracketing broken)
//! - **Invariant**: `Invariant` (an assertion over deltas or events failed)
//! - **Input**: `EventDecode`, `InvalidAddress`, `InvalidAmount`, `Config`

use serde::{Deserialize, Serialize};

// =============================================================================
// INVARIANT VIOLATION
// =============================================================================

/// Structured record of a failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Name of the check that failed (e.g. `distribution.event_amount`).
    pub check: String,
    /// Entity role involved, if the check is about a holder.
    pub entity: Option<String>,
    /// Token label involved, if the check is about a token.
    pub token: Option<String>,
    /// What the check required.
    pub expected: String,
    /// What was observed.
    pub observed: String,
    /// Human-readable message.
    pub message: String,
}

impl InvariantViolation {
    pub fn new(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            entity: None,
            token: None,
            expected: String::new(),
            observed: String::new(),
            message: message.into(),
        }
    }

    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn values(mut self, expected: impl ToString, observed: impl ToString) -> Self {
        self.expected = expected.to_string();
        self.observed = observed.to_string();
        self
    }

    /// Deterministic multi-line dump for console output.
    pub fn format_text(&self) -> String {
        let mut out = String::new();
        out.push_str("=== INVARIANT VIOLATION ===\n");
        out.push_str(&format!("Check:    {}\n", self.check));
        if let Some(ref entity) = self.entity {
            out.push_str(&format!("Entity:   {}\n", entity));
        }
        if let Some(ref token) = self.token {
            out.push_str(&format!("Token:    {}\n", token));
        }
        if !self.expected.is_empty() || !self.observed.is_empty() {
            out.push_str(&format!("Expected: {}\n", self.expected));
            out.push_str(&format!("Observed: {}\n", self.observed));
        }
        out.push_str(&format!("Message:  {}\n", self.message));
        out.push_str("===========================\n");
        out
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.check)?;
        match (&self.entity, &self.token) {
            (Some(e), Some(t)) => write!(f, " {}/{}", e, t)?,
            (Some(e), None) => write!(f, " {}", e)?,
            (None, Some(t)) => write!(f, " {}", t)?,
            (None, None) => {}
        }
        write!(f, ": {}", self.message)?;
        if !self.expected.is_empty() || !self.observed.is_empty() {
            write!(f, " (expected {}, observed {})", self.expected, self.observed)?;
        }
        Ok(())
    }
}

// =============================================================================
// VERIFIER ERROR
// =============================================================================

/// Which side of the bracket a snapshot was taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSide {
    Before,
    After,
}

impl std::fmt::Display for SnapshotSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
        }
    }
}

/// Errors raised by the harvest verifier.
#[derive(Debug, Clone)]
pub enum VerifierError {
    /// A read against the system under test failed or reverted.
    SnapshotRead { call: String, reason: String },
    /// The policy references a role the registry cannot resolve.
    UnknownRole { role: String },
    /// The policy references a token label the token set does not contain.
    UnresolvedToken { label: String },
    /// An (entity, token) pair is absent from a snapshot.
    MissingPair {
        entity: String,
        token: String,
        side: SnapshotSide,
    },
    /// A scalar state value is absent from a snapshot.
    MissingScalar { key: String, side: SnapshotSide },
    /// Before and after snapshots do not probe the same pairs.
    CoverageMismatch {
        only_before: Vec<String>,
        only_after: Vec<String>,
    },
    /// Snapshots do not bracket the operation in strict order.
    OrderingViolation { reason: String },
    /// An invariant check failed.
    Invariant(Box<InvariantViolation>),
    /// An event record lacks a field or carries a malformed value.
    EventDecode { kind: String, reason: String },
    /// Malformed account identifier.
    InvalidAddress { value: String, reason: String },
    /// Malformed amount.
    InvalidAmount { value: String, reason: String },
    /// Misconfigured policy, variant or config file.
    Config { reason: String },
}

impl VerifierError {
    pub fn invariant(violation: InvariantViolation) -> Self {
        Self::Invariant(Box::new(violation))
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// The violation carried by this error, if it is an invariant failure.
    pub fn violation(&self) -> Option<&InvariantViolation> {
        match self {
            Self::Invariant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

impl std::fmt::Display for VerifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SnapshotRead { call, reason } => {
                write!(f, "Snapshot read failed for {}: {}", call, reason)
            }
            Self::UnknownRole { role } => write!(f, "Unknown entity role: {}", role),
            Self::UnresolvedToken { label } => write!(f, "Unresolved token label: {}", label),
            Self::MissingPair {
                entity,
                token,
                side,
            } => {
                write!(
                    f,
                    "Pair ({}, {}) missing from {} snapshot",
                    entity, token, side
                )
            }
            Self::MissingScalar { key, side } => {
                write!(f, "Scalar '{}' missing from {} snapshot", key, side)
            }
            Self::CoverageMismatch {
                only_before,
                only_after,
            } => {
                write!(
                    f,
                    "Snapshot coverage mismatch: only before [{}], only after [{}]",
                    only_before.join(", "),
                    only_after.join(", ")
                )
            }
            Self::OrderingViolation { reason } => write!(f, "Ordering violation: {}", reason),
            Self::Invariant(v) => write!(f, "Invariant violation {}", v),
            Self::EventDecode { kind, reason } => {
                write!(f, "Cannot decode '{}' event: {}", kind, reason)
            }
            Self::InvalidAddress { value, reason } => {
                write!(f, "Invalid address '{}': {}", value, reason)
            }
            Self::InvalidAmount { value, reason } => {
                write!(f, "Invalid amount '{}': {}", value, reason)
            }
            Self::Config { reason } => write!(f, "Configuration error: {}", reason),
        }
    }
}

impl std::error::Error for VerifierError {}

impl From<InvariantViolation> for VerifierError {
    fn from(v: InvariantViolation) -> Self {
        Self::invariant(v)
    }
}

/// Result type used throughout the verifier.
pub type VerifierResult<T> = Result<T, VerifierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display_includes_pair_and_values() {
        let v = InvariantViolation::new("distribution.event_amount", "event amount != tree delta")
            .entity("badgerTree")
            .token("graviAura")
            .values(100u32, 99u32);
        let text = v.to_string();
        assert!(text.contains("badgerTree/graviAura"));
        assert!(text.contains("expected 100, observed 99"));
        assert!(v.format_text().contains("Check:    distribution.event_amount"));
    }

    #[test]
    fn test_invariant_error_exposes_violation() {
        let err = VerifierError::from(InvariantViolation::new("dust", "residual"));
        assert!(err.is_invariant());
        assert_eq!(err.violation().map(|v| v.check.as_str()), Some("dust"));
        assert!(!VerifierError::config("x").is_invariant());
    }
}

//! Comparison and verification reports.

use crate::verifier::amount::{format_delta, signed_delta};
use crate::verifier::diff::SnapshotDiff;
use serde::{Deserialize, Serialize};

/// Result of one passed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub name: String,
    pub summary: String,
}

/// Successful verification of one harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub policy: String,
    pub block_before: u64,
    pub block_after: u64,
    pub checks: Vec<CheckOutcome>,
    pub changed_pairs: usize,
    pub fingerprint_before: String,
    pub fingerprint_after: String,
}

impl VerificationReport {
    pub fn new(policy: &str, diff: &SnapshotDiff<'_>, checks: Vec<CheckOutcome>) -> Self {
        Self {
            policy: policy.to_string(),
            block_before: diff.before().block(),
            block_after: diff.after().block(),
            checks,
            changed_pairs: diff.changed().len(),
            fingerprint_before: diff.before().fingerprint(),
            fingerprint_after: diff.after().fingerprint(),
        }
    }

    pub fn format_text(&self) -> String {
        let mut out = String::new();
        out.push_str("=== HARVEST VERIFICATION ===\n");
        out.push_str(&format!("Policy:  {}\n", self.policy));
        out.push_str(&format!(
            "Blocks:  {} -> {}\n",
            self.block_before, self.block_after
        ));
        out.push_str(&format!("Changed: {} pair(s)\n", self.changed_pairs));
        out.push_str(&format!("Before:  {}\n", short_fingerprint(&self.fingerprint_before)));
        out.push_str(&format!("After:   {}\n", short_fingerprint(&self.fingerprint_after)));
        out.push_str("\nChecks:\n");
        for (i, check) in self.checks.iter().enumerate() {
            out.push_str(&format!("  {:>2}. PASS {:<16} {}\n", i + 1, check.name, check.summary));
        }
        out.push_str("============================\n");
        out
    }
}

/// First 16 characters; fingerprints loaded from JSON need not be hex.
fn short_fingerprint(fingerprint: &str) -> String {
    fingerprint.chars().take(16).collect()
}

/// Tabular before/after comparison of every tracked pair, then scalars.
pub fn render_comparison(diff: &SnapshotDiff<'_>, show_unchanged: bool) -> String {
    let rows: Vec<_> = diff
        .rows()
        .into_iter()
        .filter(|r| show_unchanged || r.before != r.after)
        .collect();

    let mut out = String::new();
    out.push_str(&format!(
        "=== Compare Harvest (blocks {} -> {}) ===\n",
        diff.before().block(),
        diff.after().block()
    ));
    out.push_str(&format!(
        "{:<16} {:<12} {:>30} {:>30} {:>31}\n",
        "ENTITY", "TOKEN", "BEFORE", "AFTER", "DELTA"
    ));
    for row in &rows {
        out.push_str(&format!(
            "{:<16} {:<12} {:>30} {:>30} {:>31}\n",
            row.entity, row.token, row.before, row.after, row.delta
        ));
    }
    if rows.is_empty() {
        out.push_str("(no balance changes)\n");
    }

    let mut scalars = diff.before().scalars().peekable();
    if scalars.peek().is_some() {
        out.push_str("\nSCALARS\n");
        for (key, before) in scalars {
            match diff.after().scalar(key) {
                Some(after) => out.push_str(&format!(
                    "{:<29} {:>30} {:>30} {:>31}\n",
                    key,
                    before,
                    after,
                    format_delta(&signed_delta(before, after))
                )),
                None => out.push_str(&format!("{:<29} {:>30} {:>30}\n", key, before, "-")),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::snapshot::Snapshot;

    #[test]
    fn test_comparison_hides_unchanged_rows() {
        let before = Snapshot::new(10)
            .with_balance("badgerTree", "graviAura", 100u64)
            .with_balance("strategy", "weth", 0u64)
            .with_scalar("vault.balance", 5000u64);
        let after = Snapshot::new(11)
            .with_balance("badgerTree", "graviAura", 130u64)
            .with_balance("strategy", "weth", 0u64)
            .with_scalar("vault.balance", 5100u64);
        let diff = SnapshotDiff::new(&before, &after).unwrap();

        let text = render_comparison(&diff, false);
        assert!(text.contains("graviAura"));
        assert!(text.contains("+30"));
        assert!(!text.contains("weth"));
        assert!(text.contains("vault.balance"));
        assert!(text.contains("+100"));

        assert!(render_comparison(&diff, true).contains("weth"));
    }

    #[test]
    fn test_report_text_tolerates_foreign_fingerprints() {
        let report = VerificationReport {
            policy: "bvl_oxd_staker".into(),
            block_before: 1,
            block_after: 2,
            checks: vec![CheckOutcome {
                name: "dust".into(),
                summary: "strategy clean".into(),
            }],
            changed_pairs: 0,
            fingerprint_before: "é".repeat(17),
            fingerprint_after: "abc".into(),
        };
        let text = report.format_text();
        assert!(text.contains(&format!("Before:  {}\n", "é".repeat(16))));
        assert!(text.contains("After:   abc\n"));
        assert!(text.contains("PASS dust"));
    }
}

//! Operation Event Log
//!
//! The harvest driver hands back the events the operation emitted, in emission
//! order. Records are deliberately untyped (`kind` + named string fields) so the
//! same log shape works for decoded receipts and hand-written JSON fixtures.
//!
//! Conventions for the kinds the checks consume:
//!
//! - `Harvested`, `TreeDistribution`: `token`, `amount`
//! - `Transfer`: `token` (the emitting ERC-20), `from`, `to`, `amount`

use crate::verifier::address::Address;
use crate::verifier::amount::{parse_amount, Amount};
use crate::verifier::error::{VerifierError, VerifierResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const HARVESTED: &str = "Harvested";
pub const TREE_DISTRIBUTION: &str = "TreeDistribution";
pub const TRANSFER: &str = "Transfer";

/// One emitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub kind: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Position in the transaction's logs, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_index: Option<u64>,
}

impl EventRecord {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            fields: BTreeMap::new(),
            log_index: None,
        }
    }

    pub fn with(mut self, field: &str, value: impl ToString) -> Self {
        self.fields.insert(field.to_string(), value.to_string());
        self
    }

    pub fn at_index(mut self, log_index: u64) -> Self {
        self.log_index = Some(log_index);
        self
    }

    /// `kind { token, amount }` record (Harvested, TreeDistribution).
    pub fn token_amount(kind: &str, token: &Address, amount: impl ToString) -> Self {
        Self::new(kind).with("token", token).with("amount", amount)
    }

    /// ERC-20 transfer of `amount` of `token`.
    pub fn transfer(token: &Address, from: &Address, to: &Address, amount: impl ToString) -> Self {
        Self::new(TRANSFER)
            .with("token", token)
            .with("from", from)
            .with("to", to)
            .with("amount", amount)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn field(&self, field: &str) -> VerifierResult<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .ok_or_else(|| VerifierError::EventDecode {
                kind: self.kind.clone(),
                reason: format!("missing field '{}'", field),
            })
    }

    pub fn address(&self, field: &str) -> VerifierResult<Address> {
        Address::parse(self.field(field)?).map_err(|e| VerifierError::EventDecode {
            kind: self.kind.clone(),
            reason: format!("field '{}': {}", field, e),
        })
    }

    /// `amount`, or `value` for raw ERC-20 transfer payloads.
    pub fn amount(&self) -> VerifierResult<Amount> {
        let raw = self
            .fields
            .get("amount")
            .or_else(|| self.fields.get("value"))
            .ok_or_else(|| VerifierError::EventDecode {
                kind: self.kind.clone(),
                reason: "missing field 'amount'".into(),
            })?;
        parse_amount(raw).map_err(|e| VerifierError::EventDecode {
            kind: self.kind.clone(),
            reason: e.to_string(),
        })
    }

    pub fn token(&self) -> VerifierResult<Address> {
        self.address("token")
    }
}

/// Ordered events of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, record: EventRecord) {
        self.records.push(record);
    }

    /// Records of `kind`, in emission order.
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a EventRecord> + 'a {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    pub fn count(&self, kind: &str) -> usize {
        self.of_kind(kind).count()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<EventRecord> for EventLog {
    fn from_iter<I: IntoIterator<Item = EventRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    #[test]
    fn test_of_kind_preserves_emission_order() {
        let log: EventLog = vec![
            EventRecord::token_amount(TREE_DISTRIBUTION, &addr(1), 10u32),
            EventRecord::transfer(&addr(9), &addr(2), &addr(3), 5u32),
            EventRecord::token_amount(TREE_DISTRIBUTION, &addr(4), 20u32),
        ]
        .into_iter()
        .collect();

        let tokens: Vec<Address> = log
            .of_kind(TREE_DISTRIBUTION)
            .map(|r| r.token().unwrap())
            .collect();
        assert_eq!(tokens, vec![addr(1), addr(4)]);
        assert_eq!(log.count(TRANSFER), 1);
    }

    #[test]
    fn test_amount_accepts_value_alias() {
        let r = EventRecord::new(TRANSFER).with("value", "0x10");
        assert_eq!(r.amount().unwrap(), Amount::from(16u32));
        assert!(EventRecord::new(TRANSFER).amount().is_err());
    }

    #[test]
    fn test_log_round_trips_as_plain_array() {
        let log = EventLog::new(vec![EventRecord::token_amount(HARVESTED, &addr(7), 1u32)]);
        let json = serde_json::to_string(&log).unwrap();
        assert!(json.starts_with('['));
        let back: EventLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
    }
}

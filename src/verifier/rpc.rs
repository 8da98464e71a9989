//! JSON-RPC Chain Access
//!
//! Blocking Ethereum JSON-RPC client implementing [`ChainReader`], plus a
//! [`ReceiptDriver`] that turns a mined harvest transaction into an
//! [`EventLog`].
//!
//! A snapshot batch is sent as ONE JSON-RPC batch request whose `eth_call`s all
//! carry the same explicit block number, so the node answers every read from
//! the same state.

use crate::verifier::address::Address;
use crate::verifier::amount::amount_from_word;
use crate::verifier::chain::{event_topic, first_word, ChainReader, ContractCall, Word};
use crate::verifier::error::{VerifierError, VerifierResult};
use crate::verifier::events::{EventLog, EventRecord, HARVESTED, TRANSFER, TREE_DISTRIBUTION};
use crate::verifier::session::{HarvestDriver, HarvestOutcome};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    #[serde(default)]
    id: Option<u64>,
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

impl RpcErrorObject {
    fn describe(&self) -> String {
        format!(
            "rpc error {}: {}",
            self.code.unwrap_or_default(),
            self.message.as_deref().unwrap_or("unknown")
        )
    }
}

fn read_error(call: &str, reason: impl Into<String>) -> VerifierError {
    VerifierError::SnapshotRead {
        call: call.to_string(),
        reason: reason.into(),
    }
}

/// Parse a hex quantity such as `0x1b4`.
pub fn parse_quantity(value: &str) -> VerifierResult<u64> {
    let body = value.trim().trim_start_matches("0x");
    u64::from_str_radix(body, 16).map_err(|e| VerifierError::InvalidAmount {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// JSON-RPC READER
// =============================================================================

/// Blocking JSON-RPC reader.
pub struct JsonRpcReader {
    client: Client,
    url: String,
}

impl JsonRpcReader {
    pub fn new(url: &str, timeout: Duration) -> VerifierResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerifierError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn post<T: serde::de::DeserializeOwned>(&self, call: &str, payload: &Value) -> VerifierResult<T> {
        let resp = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .map_err(|e| read_error(call, format!("RPC request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(read_error(call, format!("HTTP {}", resp.status())));
        }
        resp.json::<T>()
            .map_err(|e| read_error(call, format!("failed to parse RPC response: {}", e)))
    }

    fn single<T: serde::de::DeserializeOwned>(&self, method: &str, params: Value) -> VerifierResult<Option<T>> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });
        let rpc: RpcResponse<T> = self.post(method, &payload)?;
        if let Some(err) = rpc.error {
            return Err(read_error(method, err.describe()));
        }
        Ok(rpc.result)
    }

    /// Receipt of a mined transaction, `None` while pending or unknown.
    pub fn receipt(&self, tx_hash: &str) -> VerifierResult<Option<RpcReceipt>> {
        self.single("eth_getTransactionReceipt", json!([tx_hash]))
    }
}

impl ChainReader for JsonRpcReader {
    fn block_number(&self) -> VerifierResult<u64> {
        let result: Option<String> = self.single("eth_blockNumber", json!([]))?;
        let hex = result.ok_or_else(|| read_error("eth_blockNumber", "no result in RPC response"))?;
        parse_quantity(&hex)
    }

    fn call_batch(&self, block: u64, calls: &[ContractCall]) -> VerifierResult<Vec<Word>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let block_tag = format!("0x{:x}", block);
        let payload: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(id, call)| {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": "eth_call",
                    "params": [
                        { "to": call.target.as_str(), "data": call.calldata() },
                        block_tag
                    ]
                })
            })
            .collect();

        debug!(block, calls = calls.len(), "Sending eth_call batch");
        let responses: Vec<RpcResponse<String>> = self.post("eth_call batch", &Value::Array(payload))?;

        // Batch responses may come back in any order.
        let mut slots: Vec<Option<Word>> = vec![None; calls.len()];
        for resp in responses {
            let idx = resp
                .id
                .map(|i| i as usize)
                .filter(|i| *i < calls.len())
                .ok_or_else(|| read_error("eth_call batch", "response with unknown id"))?;
            let label = &calls[idx].label;
            if let Some(err) = resp.error {
                warn!(call = %label, block, "eth_call failed");
                return Err(read_error(label, err.describe()));
            }
            let result = resp
                .result
                .ok_or_else(|| read_error(label, "no result in RPC response"))?;
            let word = first_word(&result).map_err(|e| match e {
                VerifierError::SnapshotRead { reason, .. } => read_error(label, reason),
                other => other,
            })?;
            slots[idx] = Some(word);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, w)| w.ok_or_else(|| read_error(&calls[i].label, "missing from batch response")))
            .collect()
    }

    fn block_transaction_count(&self, block: u64) -> VerifierResult<Option<u64>> {
        let result: Option<String> = self.single(
            "eth_getBlockTransactionCountByNumber",
            json!([format!("0x{:x}", block)]),
        )?;
        result.map(|hex| parse_quantity(&hex)).transpose()
    }
}

// =============================================================================
// RECEIPTS
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(default)]
    pub log_index: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: String,
    pub block_number: String,
    #[serde(default)]
    pub status: Option<String>,
    pub logs: Vec<RpcLog>,
}

fn topic_word(kind: &str, value: &str) -> VerifierResult<Word> {
    let bytes = hex::decode(value.trim().trim_start_matches("0x")).map_err(|e| VerifierError::EventDecode {
        kind: kind.to_string(),
        reason: format!("bad hex: {}", e),
    })?;
    if bytes.len() < 32 {
        return Err(VerifierError::EventDecode {
            kind: kind.to_string(),
            reason: format!("word too short: {} bytes", bytes.len()),
        });
    }
    let mut word = [0u8; 32];
    word.copy_from_slice(&bytes[..32]);
    Ok(word)
}

/// Decode the logs the checks consume; other logs are skipped.
///
/// - `Transfer(address indexed from, address indexed to, uint256 value)`
/// - `Harvested(address indexed token, uint256 amount, uint256 indexed blockNumber, uint256 timestamp)`
/// - `TreeDistribution(address indexed token, uint256 amount, uint256 indexed blockNumber, uint256 timestamp)`
pub fn decode_log(log: &RpcLog) -> VerifierResult<Option<EventRecord>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let topic0 = topic0.to_ascii_lowercase();
    let emitter = Address::parse(&log.address)?;

    let mut record = if topic0 == event_topic("Transfer(address,address,uint256)") {
        // ERC-721 transfers index the token id too.
        if log.topics.len() != 3 {
            return Ok(None);
        }
        let from = Address::from_word(&topic_word(TRANSFER, &log.topics[1])?);
        let to = Address::from_word(&topic_word(TRANSFER, &log.topics[2])?);
        let amount = amount_from_word(&topic_word(TRANSFER, &log.data)?);
        EventRecord::transfer(&emitter, &from, &to, amount)
    } else {
        let kind = if topic0 == event_topic("Harvested(address,uint256,uint256,uint256)") {
            HARVESTED
        } else if topic0 == event_topic("TreeDistribution(address,uint256,uint256,uint256)") {
            TREE_DISTRIBUTION
        } else {
            return Ok(None);
        };
        let token_topic = log.topics.get(1).ok_or_else(|| VerifierError::EventDecode {
            kind: kind.to_string(),
            reason: "missing indexed token".into(),
        })?;
        let token = Address::from_word(&topic_word(kind, token_topic)?);
        let amount = amount_from_word(&topic_word(kind, &log.data)?);
        EventRecord::token_amount(kind, &token, amount).with("emitter", &emitter)
    };

    if let Some(ref idx) = log.log_index {
        record = record.at_index(parse_quantity(idx)?);
    }
    Ok(Some(record))
}

/// Decode every recognised log of a receipt, in log order.
pub fn decode_receipt(receipt: &RpcReceipt) -> VerifierResult<HarvestOutcome> {
    if receipt.status.as_deref() == Some("0x0") {
        return Err(read_error(
            "eth_getTransactionReceipt",
            format!("transaction {} reverted", receipt.transaction_hash),
        ));
    }
    let mut events = EventLog::default();
    for log in &receipt.logs {
        if let Some(record) = decode_log(log)? {
            events.push(record);
        }
    }
    Ok(HarvestOutcome {
        events,
        block: Some(parse_quantity(&receipt.block_number)?),
    })
}

// =============================================================================
// RECEIPT DRIVER
// =============================================================================

/// Driver for a harvest that has already been mined: "executing" it means
/// fetching and decoding its receipt.
pub struct ReceiptDriver<'a> {
    reader: &'a JsonRpcReader,
    tx_hash: String,
}

impl<'a> ReceiptDriver<'a> {
    pub fn new(reader: &'a JsonRpcReader, tx_hash: &str) -> VerifierResult<Self> {
        let body = tx_hash.trim().trim_start_matches("0x");
        if body.len() != 64 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VerifierError::config(format!(
                "invalid transaction hash '{}'",
                tx_hash
            )));
        }
        Ok(Self {
            reader,
            tx_hash: format!("0x{}", body.to_ascii_lowercase()),
        })
    }
}

impl HarvestDriver for ReceiptDriver<'_> {
    fn execute(&mut self) -> VerifierResult<HarvestOutcome> {
        let receipt = self
            .reader
            .receipt(&self.tx_hash)?
            .ok_or_else(|| read_error("eth_getTransactionReceipt", format!("no receipt for {}", self.tx_hash)))?;
        let outcome = decode_receipt(&receipt)?;
        info!(
            tx = %self.tx_hash,
            block = ?outcome.block,
            events = outcome.events.len(),
            "Harvest receipt decoded"
        );
        Ok(outcome)
    }
}

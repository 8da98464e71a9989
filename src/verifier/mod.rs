//! Harvest Accounting Verifier
//!
//! Verifies that a vault strategy's harvest moves value between a fixed set of
//! economic actors the way its variant policy says it should.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   ┌────────────────┐
//! │ EntityRegistry │   │    TokenSet    │   roles / labels -> addresses
//! └───────┬────────┘   └───────┬────────┘
//!         └─────────┬──────────┘
//!                   ▼
//! ┌─────────────────────────────────┐
//! │         SnapshotEngine          │   one batched read per capture
//! │  (ChainReader, pinned block)    │
//! └────────────────┬────────────────┘
//!        before ───┼─── after
//!                  ▼                        ┌──────────────┐
//! ┌─────────────────────────────────┐       │HarvestDriver │
//! │          SnapshotDiff           │       │ (event log)  │
//! └────────────────┬────────────────┘       └──────┬───────┘
//!                  └──────────────┬────────────────┘
//!                                 ▼
//!                 ┌─────────────────────────────────┐
//!                 │ InvariantChecker(HarvestPolicy) │
//!                 └────────────────┬────────────────┘
//!                                  ▼
//!                  VerificationReport | VerifierError
//! ```
//!
//! # Guarantees
//!
//! - **Coverage**: before and after probe exactly the same pairs
//! - **Ordering**: before ≺ operation ≼ after, checked by block number
//! - **Exactness**: amounts are uint256-wide and compared without tolerance
//! - **Fail-fast**: the first violated check ends the pass

pub mod address;
pub mod amount;
pub mod chain;
pub mod checker;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod policy;
pub mod registry;
pub mod report;
pub mod rpc;
pub mod session;
pub mod snapshot;
pub mod tokens;
pub mod variants;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod diff_tests;
#[cfg(test)]
mod snapshot_tests;

pub use address::Address;
pub use amount::{Amount, Delta};
pub use chain::{ChainReader, ContractCall, Word};
pub use checker::{GateState, InvariantChecker};
pub use config::VerifierConfig;
pub use diff::{delta, value, DeltaRow, SnapshotDiff};
pub use error::{InvariantViolation, SnapshotSide, VerifierError, VerifierResult};
pub use events::{EventLog, EventRecord};
pub use policy::{
    AmountSource, DistributionCheck, DistributionRule, FeeRecipient, HarvestPolicy, InflowFilter,
    MatchingMode, PolicyCheck, RewardInflow, ScalarExpect, ThresholdGate, TransferInflow,
};
pub use registry::{roles, AddressSource, EntityRegistry, RoleSpec};
pub use report::{render_comparison, CheckOutcome, VerificationReport};
pub use rpc::{JsonRpcReader, ReceiptDriver};
pub use session::{
    block_is_shared, check_ordering, verify_records, CaptureRecord, HarvestDriver, HarvestOutcome, HarvestSession,
};
pub use snapshot::{ScalarProbe, Snapshot, SnapshotEngine};
pub use tokens::{tokens_for, TokenSet, TokenSpec};
pub use variants::{available_variants, variant_by_name};

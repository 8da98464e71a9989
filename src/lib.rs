//! Harvest Verifier Library
//!
//! Exposes the verifier for the `harvest_verify` binary and integration tests.

pub mod verifier;

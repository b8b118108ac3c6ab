//! # vigil-store
//!
//! Durable state for the Vigil governance pipeline, kept in one SQLite database:
//!
//! - **Receipt log**: individual T2/T3 receipts and T0/T1 batch artifacts, append-only.
//! - **Trust table**: one record per capability, upserted on every outcome.
//! - **Journal**: in-flight snapshots and verification tasks, read by crash recovery,
//!   plus the governance version pointer.

pub mod store;

pub use store::GovernanceStore;

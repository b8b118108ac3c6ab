//! # vigil-cli
//!
//! Command-line interface for the Vigil governance pipeline.
//!
//! ## Commands
//!
//! - `vigil check`: Validate a governance document (optionally on every change)
//! - `vigil classify`: Show the tier and rationale for a hypothetical action
//! - `vigil receipts`: List stored receipts and batches, verify their hashes
//! - `vigil trust`: Inspect trust records, authorize or revoke graduations
//! - `vigil recover`: Settle work left behind by an unclean shutdown
//! - `vigil config`: Show the effective configuration

pub mod commands;

pub use commands::Cli;

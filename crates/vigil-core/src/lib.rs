//! # vigil-core
//!
//! Core types, traits, and primitives for the Vigil governance pipeline.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! the risk tiers, action intents, policy decisions, receipts, and the traits through
//! which the pipeline talks to its external collaborators (execution backend, state
//! store, receipt sink, persisted journal).

pub mod backend;
pub mod error;
pub mod event;
pub mod journal;
pub mod receipt;
pub mod trust;
pub mod types;

pub use backend::{ActionOutcome, ExecutionBackend, StateStore, Verifier};
pub use error::{Result, VigilError};
pub use event::{Event, EventBus};
pub use journal::{GovernanceJournal, SnapshotDisposition, TaskRecord, TaskStatus};
pub use receipt::{BatchArtifact, Receipt, ReceiptOutcome, ReceiptSink};
pub use trust::{GraduationProposal, TrustRecord, TrustStore};
pub use types::*;

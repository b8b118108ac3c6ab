//! # vigil-governance
//!
//! The risk-tiered governance pipeline. Every proposed action is classified
//! into a tier, decided (from the policy cache for T0/T1, live for T2/T3),
//! executed through the backend, verified, and receipted:
//!
//! - **T0/T1** verify asynchronously on background workers, may be
//!   snapshotted and rolled back, and batch their receipts.
//! - **T2/T3** cross the tier boundary first: buffered receipts are flushed
//!   and the verification queue is drained before the live decision.
//! - **T3** additionally requires human approval.
//!
//! The trust ledger observes every terminal outcome and proposes graduation
//! (a lower tier) after sustained success; proposals only take effect when
//! authorized.

pub mod approval;
pub mod cache;
pub mod classifier;
pub mod gate;
pub mod governance;
pub mod governor;
pub mod journal;
pub mod mock;
pub mod queue;
pub mod receipts;
pub mod rollback;
pub mod state;
pub mod trust;

pub use approval::{ApprovalGate, ApprovalRequest, ApprovalResponse, PendingApproval};
pub use cache::{CacheLookup, PolicyCache};
pub use classifier::{Classification, TrustGrants, classify, scope_bucket};
pub use gate::TierBoundaryGate;
pub use governance::{Governance, GovernanceRegistry, validate_constitution};
pub use governor::{
    ActionReport, ActionRequest, ActionState, ActionStatus, Governor, GovernorBuilder,
    RecoveryReport,
};
pub use journal::MemoryJournal;
pub use mock::{MockBackend, MockVerifier};
pub use queue::{
    InFlight, VerificationFailure, VerificationHandle, VerificationHook, VerificationQueue,
    VerificationReport, VerificationTask,
};
pub use receipts::{MemoryReceiptSink, ReceiptBuffer};
pub use rollback::{RollbackManager, RollbackOutcome};
pub use state::{FsStateStore, MemoryStateStore};
pub use trust::TrustLedger;

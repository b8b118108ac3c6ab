use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the entire Vigil pipeline.
#[derive(Error, Debug)]
pub enum VigilError {
    // ── Classification / policy errors ─────────────────────────
    #[error("classification failed: {0}")]
    Classification(String),

    #[error("policy cache inconsistent: cached {cached}, active {active}")]
    CacheInconsistency { cached: u64, active: u64 },

    #[error("governance document rejected: {rule}: {reason}")]
    ConstitutionValidation { rule: String, reason: String },

    // ── Snapshot / rollback errors ─────────────────────────────
    #[error("snapshot failure for {target}: {reason}")]
    SnapshotFailure { target: String, reason: String },

    #[error("rollback failed for action {action_id}: {reason}")]
    RollbackFailed { action_id: Uuid, reason: String },

    // ── Verification errors ────────────────────────────────────
    #[error("verification of action {action_id} timed out after {timeout_secs}s")]
    VerificationTimeout { action_id: Uuid, timeout_secs: u64 },

    #[error("boundary crossing refused: {reason}")]
    BoundaryCrossingRefused {
        reason: String,
        failed_actions: Vec<Uuid>,
    },

    #[error("unknown action: {0}")]
    UnknownAction(Uuid),

    // ── Execution / approval errors ────────────────────────────
    #[error("execution failed: {capability}: {reason}")]
    Execution { capability: String, reason: String },

    #[error("human approval denied: {0}")]
    ApprovalDenied(String),

    // ── Trust errors ───────────────────────────────────────────
    #[error("graduation rejected for {capability}: {reason}")]
    GraduationRejected { capability: String, reason: String },

    // ── Integrity / storage errors ─────────────────────────────
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("store error: {0}")]
    Store(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VigilError>;

//! Persisted record of in-flight reversible work, so an unclean shutdown
//! cannot silently lose an action that still needs verifying or undoing,
//! plus the governance version pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::ActionOutcome;
use crate::types::{ActionId, ActionIntent, GovernanceVersion, PolicyDecision, RiskTier, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// How a snapshot left the rollback manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotDisposition {
    /// Verification passed; the snapshot was discarded.
    Released,
    /// Prior state was restored.
    RolledBack,
    /// Dropped by retention before being settled; the action can no longer be undone.
    Evicted,
}

impl SnapshotDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Released => "released",
            Self::RolledBack => "rolled_back",
            Self::Evicted => "evicted",
        }
    }
}

/// Persisted form of a verification task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub action_id: ActionId,
    pub tier: RiskTier,
    pub intent: ActionIntent,
    pub decision: PolicyDecision,
    /// Outcome the backend reported; what the predicate is asked to confirm.
    pub expected_outcome: ActionOutcome,
    pub status: TaskStatus,
    pub enqueued_at: DateTime<Utc>,
}

/// Durable journal of snapshots and verification tasks.
pub trait GovernanceJournal: Send + Sync {
    fn record_snapshot(&self, snapshot: &Snapshot) -> crate::Result<()>;
    fn settle_snapshot(&self, action_id: ActionId, disposition: SnapshotDisposition)
    -> crate::Result<()>;
    fn record_task(&self, task: &TaskRecord) -> crate::Result<()>;
    fn update_task(&self, action_id: ActionId, status: TaskStatus) -> crate::Result<()>;
    /// Snapshots that were never released, rolled back, or evicted.
    fn unsettled_snapshots(&self) -> crate::Result<Vec<Snapshot>>;
    /// Tasks that never reached a terminal status.
    fn unfinished_tasks(&self) -> crate::Result<Vec<TaskRecord>>;
    /// Move the governance version pointer.
    fn record_activation(&self, version: GovernanceVersion, label: &str) -> crate::Result<()>;
    /// The last activated governance version, if any.
    fn last_activation(&self) -> crate::Result<Option<GovernanceVersion>>;
}

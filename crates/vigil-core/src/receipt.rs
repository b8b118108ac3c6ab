//! Append-only audit receipts and integrity-hashed batch artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VigilError;
use crate::types::{ActionId, PolicyDecision, ReceiptId, RiskTier};

/// How a governed action ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReceiptOutcome {
    /// Executed and the verification predicate passed.
    Verified,
    /// Verification failed and the prior state was restored.
    RolledBack { reason: String },
    /// Never executed.
    Denied { reason: String },
    /// Executed (or attempted) but failed without a snapshot to restore.
    Failed { reason: String },
    /// Verification was cancelled before it started.
    Cancelled,
}

impl ReceiptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Verified)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::RolledBack { .. } => "rolled_back",
            Self::Denied { .. } => "denied",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Human-readable reason, empty for a verified outcome.
    pub fn reason(&self) -> &str {
        match self {
            Self::RolledBack { reason } | Self::Denied { reason } | Self::Failed { reason } => {
                reason
            }
            Self::Verified => "",
            Self::Cancelled => "verification cancelled before it started",
        }
    }
}

/// Immutable audit record of one governed action and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: ReceiptId,
    pub action_id: ActionId,
    pub capability: String,
    pub actor: String,
    pub tier: RiskTier,
    pub decision: PolicyDecision,
    pub outcome: ReceiptOutcome,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
    /// blake3 over the canonical JSON of every other field.
    pub hash: String,
}

#[derive(Serialize)]
struct ReceiptBody<'a> {
    id: &'a ReceiptId,
    action_id: &'a ActionId,
    capability: &'a str,
    actor: &'a str,
    tier: RiskTier,
    decision: &'a PolicyDecision,
    outcome: &'a ReceiptOutcome,
    duration_ms: u64,
    created_at: &'a DateTime<Utc>,
}

impl Receipt {
    /// Build and hash a receipt.
    ///
    /// A success outcome on a decision that did not allow execution is an
    /// integrity violation and is refused.
    pub fn seal(
        action_id: ActionId,
        capability: &str,
        actor: &str,
        decision: PolicyDecision,
        outcome: ReceiptOutcome,
        duration_ms: u64,
    ) -> crate::Result<Self> {
        if !decision.allowed && outcome.is_success() {
            return Err(VigilError::Integrity(format!(
                "action {action_id} was not allowed but reported success"
            )));
        }
        let mut receipt = Self {
            id: Uuid::new_v4(),
            action_id,
            capability: capability.to_string(),
            actor: actor.to_string(),
            tier: decision.tier,
            decision,
            outcome,
            duration_ms,
            created_at: Utc::now(),
            hash: String::new(),
        };
        receipt.hash = receipt.compute_hash()?;
        Ok(receipt)
    }

    pub fn compute_hash(&self) -> crate::Result<String> {
        let body = ReceiptBody {
            id: &self.id,
            action_id: &self.action_id,
            capability: &self.capability,
            actor: &self.actor,
            tier: self.tier,
            decision: &self.decision,
            outcome: &self.outcome,
            duration_ms: self.duration_ms,
            created_at: &self.created_at,
        };
        let bytes = serde_json::to_vec(&body)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    pub fn verify_integrity(&self) -> bool {
        self.compute_hash().is_ok_and(|h| h == self.hash)
    }
}

/// A group of T0/T1 receipts flushed together under one integrity hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchArtifact {
    pub id: ReceiptId,
    pub receipts: Vec<Receipt>,
    pub created_at: DateTime<Utc>,
    /// blake3 over the member receipt hashes, in order.
    pub hash: String,
}

impl BatchArtifact {
    pub fn seal(receipts: Vec<Receipt>) -> Self {
        let hash = Self::hash_members(&receipts);
        Self {
            id: Uuid::new_v4(),
            receipts,
            created_at: Utc::now(),
            hash,
        }
    }

    fn hash_members(receipts: &[Receipt]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(receipts.len() as u64).to_le_bytes());
        for r in receipts {
            hasher.update(r.hash.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Recompute every member hash and the batch hash.
    pub fn verify_integrity(&self) -> bool {
        self.receipts.iter().all(Receipt::verify_integrity)
            && Self::hash_members(&self.receipts) == self.hash
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }
}

/// Durable append-only store for receipts.
pub trait ReceiptSink: Send + Sync {
    /// Append an individual (T2/T3) receipt.
    fn append_receipt(&self, receipt: &Receipt) -> crate::Result<()>;

    /// Append a batch artifact of T0/T1 receipts.
    fn append_batch(&self, batch: &BatchArtifact) -> crate::Result<()>;
}

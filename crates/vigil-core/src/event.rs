use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{GovernanceVersion, RiskTier};

/// Governance events flowing through the pipeline, for observers and audit tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Decision lifecycle ─────────────────────────────────────
    ActionClassified {
        action_id: Uuid,
        capability: String,
        tier: RiskTier,
    },
    ActionDecided {
        action_id: Uuid,
        allowed: bool,
        cache_hit: bool,
    },
    BoundaryCrossed {
        action_id: Uuid,
        tier: RiskTier,
    },
    BoundaryRefused {
        action_id: Uuid,
        reason: String,
    },
    ApprovalRequested {
        request_id: Uuid,
        action_id: Uuid,
        capability: String,
    },
    ApprovalResolved {
        request_id: Uuid,
        approved: bool,
    },

    // ── Verification lifecycle ─────────────────────────────────
    VerificationPassed {
        action_id: Uuid,
    },
    VerificationFailed {
        action_id: Uuid,
        reason: String,
    },
    RolledBack {
        action_id: Uuid,
    },
    BatchFlushed {
        batch_id: Uuid,
        receipts: usize,
    },

    // ── Trust lifecycle ────────────────────────────────────────
    GraduationProposed {
        capability: String,
        from: RiskTier,
        to: RiskTier,
    },
    GraduationAuthorized {
        capability: String,
        to: RiskTier,
    },
    GraduationRevoked {
        capability: String,
        reason: String,
    },

    // ── Governance document lifecycle ──────────────────────────
    GovernanceActivated {
        version: GovernanceVersion,
        label: String,
    },
    GovernanceRejected {
        reason: String,
    },
}

/// A broadcast-based event bus for pipeline-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

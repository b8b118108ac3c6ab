use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::RiskTier;

/// A proposed tier decrease for a capability, awaiting external authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraduationProposal {
    pub id: Uuid,
    pub capability: String,
    pub from: RiskTier,
    pub to: RiskTier,
    /// Consecutive successes backing the proposal.
    pub evidence: u64,
    pub created_at: DateTime<Utc>,
}

/// Per-capability outcome history. Mutated on every terminal verification, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub capability: String,
    /// Tier the governance document assigns by default.
    pub default_tier: RiskTier,
    /// Lowest tier graduation may ever reach.
    pub tier_ceiling: RiskTier,
    /// Tier granted by an authorized graduation or imposed by a rollback penalty.
    /// `None` means the default applies.
    #[serde(default)]
    pub granted_tier: Option<RiskTier>,
    pub success_count: u64,
    pub failure_count: u64,
    /// Terminal outcomes observed for this capability; the cooldown clock.
    pub actions_observed: u64,
    /// No proposal may be generated while `actions_observed < cooldown_until`.
    pub cooldown_until: u64,
    #[serde(default)]
    pub pending_proposal: Option<GraduationProposal>,
    pub updated_at: DateTime<Utc>,
}

impl TrustRecord {
    pub fn new(
        capability: impl Into<String>,
        default_tier: RiskTier,
        tier_ceiling: RiskTier,
    ) -> Self {
        Self {
            capability: capability.into(),
            default_tier,
            // A ceiling above the default would be a raise, which graduation never does.
            tier_ceiling: tier_ceiling.min(default_tier),
            granted_tier: None,
            success_count: 0,
            failure_count: 0,
            actions_observed: 0,
            cooldown_until: 0,
            pending_proposal: None,
            updated_at: Utc::now(),
        }
    }

    /// The tier this record currently stands at.
    pub fn effective_tier(&self) -> RiskTier {
        self.granted_tier.unwrap_or(self.default_tier)
    }

    pub fn in_cooldown(&self) -> bool {
        self.actions_observed < self.cooldown_until
    }

    /// Actions left before the cooldown expires.
    pub fn cooldown_remaining(&self) -> u64 {
        self.cooldown_until.saturating_sub(self.actions_observed)
    }
}

/// Persistence for the trust table, keyed by capability.
pub trait TrustStore: Send + Sync {
    fn save_trust(&self, record: &TrustRecord) -> crate::Result<()>;
    fn load_trust(&self) -> crate::Result<Vec<TrustRecord>>;
}

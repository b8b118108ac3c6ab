//! Trust ledger: per-capability outcome history and graduation proposals.
//!
//! Graduation is proposed here but never applied without an explicit
//! authorization. Failures and rollbacks reset the evidence and start a
//! cooldown counted in subsequent actions.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_config::schema::TrustConfig;
use vigil_config::GovernanceDocument;
use vigil_core::{
    Event, EventBus, GraduationProposal, RiskTier, TrustRecord, TrustStore, VigilError,
};

use crate::classifier::TrustGrants;

pub struct TrustLedger {
    /// One lock per capability; updates to different capabilities run in parallel.
    records: DashMap<String, Arc<Mutex<TrustRecord>>>,
    /// Grants in force, republished whenever one changes. Classification
    /// reads only this and never waits on a record lock.
    grants: RwLock<Arc<TrustGrants>>,
    config: TrustConfig,
    store: Option<Arc<dyn TrustStore>>,
    events: EventBus,
}

impl TrustLedger {
    pub fn new(config: TrustConfig, events: EventBus) -> Self {
        Self {
            records: DashMap::new(),
            grants: RwLock::new(Arc::new(TrustGrants::empty())),
            config,
            store: None,
            events,
        }
    }

    /// Persist records through `store`, starting from what it already holds.
    pub fn with_store(mut self, store: Arc<dyn TrustStore>) -> vigil_core::Result<Self> {
        let loaded = store.load_trust()?;
        info!(records = loaded.len(), "trust ledger loaded");
        for record in loaded {
            self.publish(&record);
            self.records
                .insert(record.capability.clone(), Arc::new(Mutex::new(record)));
        }
        self.store = Some(store);
        Ok(self)
    }

    /// Align records with a newly activated governance document: default
    /// tiers and ceilings follow the document, grants are clamped to the new ceiling.
    pub fn sync_with(&self, document: &GovernanceDocument) {
        for (capability, rule) in &document.capabilities {
            let ceiling = rule.effective_ceiling();
            let entry = self
                .records
                .entry(capability.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(TrustRecord::new(capability.clone(), rule.tier, ceiling)))
                })
                .clone();

            let mut record = entry.lock();
            let changed = record.default_tier != rule.tier || record.tier_ceiling != ceiling;
            if !changed {
                continue;
            }
            record.default_tier = rule.tier;
            record.tier_ceiling = ceiling;
            if let Some(granted) = record.granted_tier
                && granted < ceiling
            {
                record.granted_tier = Some(ceiling);
            }
            if record.granted_tier == Some(record.default_tier) {
                record.granted_tier = None;
            }
            if let Some(proposal) = &record.pending_proposal
                && proposal.to < ceiling
            {
                record.pending_proposal = None;
            }
            debug!(
                capability = %capability,
                default = %rule.tier,
                ceiling = %ceiling,
                "trust record realigned"
            );
            self.persist(&mut record);
        }
    }

    fn entry(&self, capability: &str) -> Arc<Mutex<TrustRecord>> {
        self.records
            .entry(capability.to_string())
            .or_insert_with(|| {
                // Undeclared capabilities sit at T3 and never graduate.
                Arc::new(Mutex::new(TrustRecord::new(
                    capability,
                    RiskTier::Irreversible,
                    RiskTier::Irreversible,
                )))
            })
            .clone()
    }

    /// Bring the published grants in line with `record`. Called with the
    /// record locked, so the snapshot never lags a change to the same capability.
    fn publish(&self, record: &TrustRecord) {
        let current = self.grants.read().get(&record.capability);
        if current == record.granted_tier {
            return;
        }
        let mut grants = self.grants.write();
        Arc::make_mut(&mut *grants).set(&record.capability, record.granted_tier);
    }

    /// Publish then write through to the store. Store I/O happens under the
    /// record lock only; classification never waits on it.
    fn persist(&self, record: &mut TrustRecord) {
        self.publish(record);
        record.updated_at = Utc::now();
        if let Some(store) = &self.store
            && let Err(e) = store.save_trust(record)
        {
            warn!(capability = %record.capability, error = %e, "failed to persist trust record");
        }
    }

    /// Record a terminal verification outcome. Returns a proposal if this
    /// outcome made the capability eligible for graduation.
    pub fn record_outcome(&self, capability: &str, success: bool) -> Option<GraduationProposal> {
        let entry = self.entry(capability);
        let mut record = entry.lock();
        record.actions_observed += 1;

        let proposal = if success {
            record.success_count += 1;
            self.maybe_propose(&mut record)
        } else {
            self.penalize(&mut record, None, "verification failed");
            None
        };
        self.persist(&mut record);
        proposal
    }

    /// Record a rollback. Resets evidence, starts a cooldown, and raises the
    /// capability one tier above its default.
    pub fn record_rollback(&self, capability: &str) {
        let entry = self.entry(capability);
        let mut record = entry.lock();
        record.actions_observed += 1;
        let penalty = record.default_tier.raised();
        self.penalize(&mut record, Some(penalty), "rolled back");
        self.persist(&mut record);
    }

    fn penalize(&self, record: &mut TrustRecord, granted: Option<RiskTier>, why: &str) {
        record.failure_count += 1;
        record.success_count = 0;
        let default = record.default_tier;
        record.granted_tier = granted.filter(|t| *t != default);
        record.pending_proposal = None;
        record.cooldown_until = record.actions_observed + self.config.cooldown_actions;
        warn!(
            capability = %record.capability,
            tier = %record.effective_tier(),
            cooldown = self.config.cooldown_actions,
            "trust reset: {why}"
        );
    }

    fn maybe_propose(&self, record: &mut TrustRecord) -> Option<GraduationProposal> {
        if record.pending_proposal.is_some() || record.in_cooldown() {
            return None;
        }
        let from = record.effective_tier();
        let to = from.lowered()?;
        if to < record.tier_ceiling {
            return None;
        }
        let threshold = self.config.threshold_for(from)?;
        if record.success_count < threshold {
            return None;
        }

        let proposal = GraduationProposal {
            id: Uuid::new_v4(),
            capability: record.capability.clone(),
            from,
            to,
            evidence: record.success_count,
            created_at: Utc::now(),
        };
        info!(
            capability = %proposal.capability,
            from = %from,
            to = %to,
            evidence = proposal.evidence,
            "graduation proposed"
        );
        self.events.publish(Event::GraduationProposed {
            capability: proposal.capability.clone(),
            from,
            to,
        });
        record.pending_proposal = Some(proposal.clone());
        Some(proposal)
    }

    /// The pending proposal for `capability`, generating one if it is eligible.
    pub fn propose_graduation(&self, capability: &str) -> Option<GraduationProposal> {
        let entry = self.entry(capability);
        let mut record = entry.lock();
        if let Some(pending) = &record.pending_proposal {
            return Some(pending.clone());
        }
        let proposal = self.maybe_propose(&mut record);
        if proposal.is_some() {
            self.persist(&mut record);
        }
        proposal
    }

    /// Resolve the pending proposal. Approval applies the new tier (never
    /// below the ceiling); declining keeps the tier and starts a cooldown.
    pub fn authorize(&self, capability: &str, approved: bool) -> vigil_core::Result<RiskTier> {
        let entry = self.entry(capability);
        let mut record = entry.lock();
        let Some(proposal) = record.pending_proposal.take() else {
            return Err(VigilError::GraduationRejected {
                capability: capability.to_string(),
                reason: "no pending graduation proposal".into(),
            });
        };

        if !approved {
            record.cooldown_until = record.actions_observed + self.config.cooldown_actions;
            self.persist(&mut record);
            info!(capability, to = %proposal.to, "graduation declined");
            return Err(VigilError::GraduationRejected {
                capability: capability.to_string(),
                reason: "declined by the authorizer".into(),
            });
        }

        let to = proposal.to.max(record.tier_ceiling);
        record.granted_tier = (to != record.default_tier).then_some(to);
        record.success_count = 0;
        self.persist(&mut record);
        info!(capability, from = %proposal.from, to = %to, "graduation authorized");
        self.events.publish(Event::GraduationAuthorized {
            capability: capability.to_string(),
            to,
        });
        Ok(to)
    }

    /// Drop any graduation and start a cooldown.
    pub fn revoke(&self, capability: &str, reason: &str) -> vigil_core::Result<()> {
        let Some(entry) = self.records.get(capability).map(|e| e.clone()) else {
            return Err(VigilError::GraduationRejected {
                capability: capability.to_string(),
                reason: "no trust record".into(),
            });
        };
        let mut record = entry.lock();
        record.granted_tier = None;
        record.pending_proposal = None;
        record.success_count = 0;
        record.cooldown_until = record.actions_observed + self.config.cooldown_actions;
        self.persist(&mut record);
        warn!(capability, reason, "graduation revoked");
        self.events.publish(Event::GraduationRevoked {
            capability: capability.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    pub fn record(&self, capability: &str) -> Option<TrustRecord> {
        self.records.get(capability).map(|e| e.lock().clone())
    }

    /// Every record, sorted by capability.
    pub fn records(&self) -> Vec<TrustRecord> {
        let mut all: Vec<TrustRecord> = self.records.iter().map(|e| e.lock().clone()).collect();
        all.sort_by(|a, b| a.capability.cmp(&b.capability));
        all
    }

    /// Tiers in force that differ from the document defaults, as last published.
    pub fn grants(&self) -> Arc<TrustGrants> {
        self.grants.read().clone()
    }
}

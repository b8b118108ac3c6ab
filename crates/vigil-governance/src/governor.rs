//! The governance orchestrator. Drives one action through its lifecycle:
//!
//! ```text
//!  CLASSIFIED ─► CACHE_CHECKED ─┬──────────────────────────────► DECIDED      (T0/T1 hit)
//!                               ├─► LIVE_EVALUATED ────────────► DECIDED      (T0/T1 miss)
//!                               └─► BOUNDARY_CROSSED ─► LIVE_EVALUATED ─► DECIDED (T2/T3)
//!
//!  DECIDED ─► [APPROVAL_GATED] ─► EXECUTING ─► VERIFYING ─► VERIFIED | ROLLED_BACK ─► RECEIPTED
//! ```
//!
//! Denials skip straight to RECEIPTED. Every action that enters the pipeline
//! leaves exactly one receipt.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vigil_config::{DocumentWatcher, GovernanceDocument, VigilConfig};
use vigil_core::{
    ActionId, ActionIntent, ActionOutcome, Event, EventBus, ExecutionBackend, GovernanceJournal,
    GovernanceVersion, GraduationProposal, PolicyDecision, Receipt, ReceiptOutcome, ReceiptSink,
    RiskTier, Snapshot, StateStore, TaskRecord, TaskStatus, TrustRecord, TrustStore, Verifier,
    VigilError,
};

use crate::approval::{ApprovalGate, ApprovalResponse, PendingApproval};
use crate::cache::{CacheLookup, PolicyCache};
use crate::classifier::{Classification, classify};
use crate::gate::TierBoundaryGate;
use crate::governance::GovernanceRegistry;
use crate::queue::{VerificationHook, VerificationQueue, VerificationReport, VerificationTask};
use crate::receipts::{MemoryReceiptSink, ReceiptBuffer};
use crate::rollback::RollbackManager;
use crate::state::FsStateStore;
use crate::trust::TrustLedger;

/// Lifecycle states an action passes through, in the order visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Classified,
    CacheChecked,
    LiveEvaluated,
    Decided,
    BoundaryCrossed,
    ApprovalGated,
    Executing,
    Verifying,
    Verified,
    RolledBack,
    Receipted,
}

/// An intent plus the predicate that decides whether its execution succeeded.
pub struct ActionRequest {
    pub intent: ActionIntent,
    pub verifier: Arc<dyn Verifier>,
}

impl ActionRequest {
    pub fn new(intent: ActionIntent, verifier: Arc<dyn Verifier>) -> Self {
        Self { intent, verifier }
    }
}

/// Where an action stands when `govern` returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    Denied { reason: String },
    /// Executed; verification continues in the background.
    Queued,
    Verified,
    RolledBack { reason: String },
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub action_id: ActionId,
    pub decision: PolicyDecision,
    pub status: ActionStatus,
    pub trail: Vec<ActionState>,
    pub outcome: Option<ActionOutcome>,
}

impl ActionReport {
    pub fn is_receipted(&self) -> bool {
        self.trail.last() == Some(&ActionState::Receipted)
    }
}

/// What [`Governor::recover`] settled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Unfinished verification tasks marked failed.
    pub tasks_failed: usize,
    /// Snapshots of those tasks that were rolled back.
    pub rolled_back: usize,
    /// Snapshots with no task record that were rolled back.
    pub orphans_rolled_back: usize,
}

/// Seal and route a receipt. A receipt that cannot be written is a
/// governance integrity failure: logged loudly, never silently dropped.
fn write_receipt(
    buffer: &ReceiptBuffer,
    action_id: ActionId,
    intent: &ActionIntent,
    decision: PolicyDecision,
    outcome: ReceiptOutcome,
    duration_ms: u64,
) -> bool {
    let receipt = match Receipt::seal(
        action_id,
        intent.capability(),
        intent.actor(),
        decision,
        outcome,
        duration_ms,
    ) {
        Ok(receipt) => receipt,
        Err(e) => {
            error!(%action_id, error = %e, "governance integrity: receipt could not be sealed");
            return false;
        }
    };
    match buffer.emit(receipt) {
        Ok(()) => true,
        Err(e) => {
            error!(%action_id, error = %e, "governance integrity: receipt could not be written");
            false
        }
    }
}

/// Settles terminal verifications: feeds the trust ledger and writes the receipt.
struct ReceiptingHook {
    buffer: Arc<ReceiptBuffer>,
    ledger: Arc<TrustLedger>,
}

impl VerificationHook for ReceiptingHook {
    fn on_terminal(&self, report: &VerificationReport) {
        let record = &report.record;
        let capability = record.intent.capability();
        match report.status {
            TaskStatus::Passed => {
                self.ledger.record_outcome(capability, true);
            }
            TaskStatus::Failed if report.rollback.is_some() => {
                self.ledger.record_rollback(capability);
            }
            TaskStatus::Failed => {
                self.ledger.record_outcome(capability, false);
            }
            TaskStatus::Cancelled | TaskStatus::Pending | TaskStatus::Running => {}
        }
        write_receipt(
            &self.buffer,
            record.action_id,
            &record.intent,
            record.decision.clone(),
            report.receipt_outcome(),
            report.duration_ms,
        );
    }
}

/// Assembles a [`Governor`] from its collaborators.
pub struct GovernorBuilder {
    config: VigilConfig,
    document: GovernanceDocument,
    backend: Arc<dyn ExecutionBackend>,
    state_store: Arc<dyn StateStore>,
    sink: Arc<dyn ReceiptSink>,
    journal: Option<Arc<dyn GovernanceJournal>>,
    trust_store: Option<Arc<dyn TrustStore>>,
    events: EventBus,
}

impl GovernorBuilder {
    /// Defaults: default config, the baseline document, the local filesystem
    /// as state store, in-memory receipts, and no persistence.
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            config: VigilConfig::default(),
            document: GovernanceDocument::baseline(),
            backend,
            state_store: Arc::new(FsStateStore::new()),
            sink: Arc::new(MemoryReceiptSink::new()),
            journal: None,
            trust_store: None,
            events: EventBus::default(),
        }
    }

    pub fn config(mut self, config: VigilConfig) -> Self {
        self.config = config;
        self
    }

    pub fn document(mut self, document: GovernanceDocument) -> Self {
        self.document = document;
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = store;
        self
    }

    pub fn receipt_sink(mut self, sink: Arc<dyn ReceiptSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn journal(mut self, journal: Arc<dyn GovernanceJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn trust_store(mut self, store: Arc<dyn TrustStore>) -> Self {
        self.trust_store = Some(store);
        self
    }

    /// Use one store for receipts, trust records, and the journal.
    pub fn persistence<S>(self, store: Arc<S>) -> Self
    where
        S: ReceiptSink + TrustStore + GovernanceJournal + 'static,
    {
        self.receipt_sink(store.clone())
            .trust_store(store.clone())
            .journal(store)
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Validate and activate the document, load trust, and start the
    /// verification workers and receipt flusher. Must be called within a Tokio runtime.
    pub fn build(self) -> vigil_core::Result<Governor> {
        let Self {
            config,
            document,
            backend,
            state_store,
            sink,
            journal,
            trust_store,
            events,
        } = self;

        let previous = match &journal {
            Some(journal) => journal.last_activation()?.unwrap_or_default(),
            None => GovernanceVersion::default(),
        };
        let registry = GovernanceRegistry::new(document, previous, events.clone())?;
        let governance = registry.current();
        if let Some(journal) = &journal {
            journal.record_activation(governance.version(), &governance.document().label)?;
        }

        let mut ledger = TrustLedger::new(config.trust.clone(), events.clone());
        if let Some(store) = trust_store {
            ledger = ledger.with_store(store)?;
        }
        ledger.sync_with(governance.document());
        let ledger = Arc::new(ledger);

        let cache = PolicyCache::new();
        cache.rebuild(&governance, &ledger.grants());

        let mut rollback =
            RollbackManager::new(state_store, config.rollback.max_snapshots, events.clone());
        if let Some(journal) = &journal {
            rollback = rollback.with_journal(journal.clone());
        }
        let rollback = Arc::new(rollback);

        let buffer = Arc::new(ReceiptBuffer::new(
            sink,
            config.receipts.max_batch_size,
            events.clone(),
        ));
        let hook = Arc::new(ReceiptingHook {
            buffer: buffer.clone(),
            ledger: ledger.clone(),
        });
        let queue = Arc::new(VerificationQueue::start(
            &config.verification,
            rollback.clone(),
            hook,
            journal.clone(),
            events.clone(),
        ));
        let gate = TierBoundaryGate::new(
            queue.clone(),
            buffer.clone(),
            Duration::from_secs(config.verification.drain_timeout_secs),
            events.clone(),
        );

        let (shutdown_tx, _) = watch::channel(false);
        let flusher = (config.receipts.flush_interval_secs > 0).then(|| {
            buffer.clone().spawn_flusher(
                Duration::from_secs(config.receipts.flush_interval_secs),
                shutdown_tx.subscribe(),
            )
        });

        Ok(Governor {
            approvals: ApprovalGate::new(events.clone()),
            config,
            registry,
            cache,
            ledger,
            rollback,
            queue,
            buffer,
            gate,
            backend,
            journal,
            events,
            shutdown_tx,
            flusher: Mutex::new(flusher),
        })
    }
}

pub struct Governor {
    config: VigilConfig,
    registry: GovernanceRegistry,
    cache: PolicyCache,
    ledger: Arc<TrustLedger>,
    rollback: Arc<RollbackManager>,
    queue: Arc<VerificationQueue>,
    buffer: Arc<ReceiptBuffer>,
    gate: TierBoundaryGate,
    approvals: ApprovalGate,
    backend: Arc<dyn ExecutionBackend>,
    journal: Option<Arc<dyn GovernanceJournal>>,
    events: EventBus,
    shutdown_tx: watch::Sender<bool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl Governor {
    pub fn builder(backend: Arc<dyn ExecutionBackend>) -> GovernorBuilder {
        GovernorBuilder::new(backend)
    }

    /// Run one action through the pipeline.
    ///
    /// Denials, refused crossings, and execution failures are reported in the
    /// returned [`ActionReport`], not as errors.
    pub async fn govern(&self, request: ActionRequest) -> vigil_core::Result<ActionReport> {
        let ActionRequest { intent, verifier } = request;
        let action_id = Uuid::new_v4();
        let started = Instant::now();
        let governance = self.registry.current();
        let mut trail = Vec::new();

        let classification = match classify(&intent, &governance, &self.ledger.grants()) {
            Ok(classification) => classification,
            Err(e) => {
                warn!(%action_id, error = %e, "classification failed, denying");
                let decision = PolicyDecision::deny(
                    format!("classification failed: {e}"),
                    governance.version(),
                );
                return Ok(self.deny(action_id, &intent, decision, trail, started));
            }
        };
        trail.push(ActionState::Classified);
        debug!(
            %action_id,
            capability = %intent.capability(),
            tier = %classification.tier,
            bucket = %classification.bucket,
            "action classified"
        );
        self.events.publish(Event::ActionClassified {
            action_id,
            capability: intent.capability().to_string(),
            tier: classification.tier,
        });

        if classification.tier.requires_boundary_crossing() {
            self.govern_controlled(action_id, intent, verifier, classification, trail, started)
                .await
        } else {
            self.govern_low_risk(action_id, intent, verifier, classification, trail, started)
                .await
        }
    }

    async fn govern_low_risk(
        &self,
        action_id: ActionId,
        intent: ActionIntent,
        verifier: Arc<dyn Verifier>,
        classification: Classification,
        mut trail: Vec<ActionState>,
        started: Instant,
    ) -> vigil_core::Result<ActionReport> {
        let cached = if classification.is_cacheable() {
            self.cache.lookup(
                intent.capability(),
                classification.bucket,
                classification.governance_version,
            )
        } else {
            CacheLookup::Miss
        };
        trail.push(ActionState::CacheChecked);

        let decision = match cached {
            CacheLookup::Hit(decision) if decision.tier == classification.tier => decision,
            CacheLookup::Hit(decision) => {
                // Pattern or trust context moved this request off the cached tier.
                self.cache.note_rejected_hit();
                debug!(
                    %action_id,
                    cached = %decision.tier,
                    live = %classification.tier,
                    "cached tier does not apply"
                );
                trail.push(ActionState::LiveEvaluated);
                classification.decision(false)
            }
            CacheLookup::Miss => {
                trail.push(ActionState::LiveEvaluated);
                classification.decision(false)
            }
        };
        trail.push(ActionState::Decided);
        self.publish_decided(action_id, &decision);

        if !decision.allowed {
            return Ok(self
                .deny_admitted(action_id, &intent, decision, trail, started)
                .await);
        }
        if classification.requires_approval {
            trail.push(ActionState::ApprovalGated);
            if let Some(denied) = self.await_approval(action_id, &intent, &decision).await {
                return Ok(self
                    .deny_admitted(action_id, &intent, denied, trail, started)
                    .await);
            }
        }

        self.execute(action_id, intent, verifier, decision, trail, started, true)
            .await
    }

    async fn govern_controlled(
        &self,
        action_id: ActionId,
        intent: ActionIntent,
        verifier: Arc<dyn Verifier>,
        classification: Classification,
        mut trail: Vec<ActionState>,
        started: Instant,
    ) -> vigil_core::Result<ActionReport> {
        trail.push(ActionState::CacheChecked);

        let pass = match self.gate.cross(action_id, classification.tier).await {
            Ok(pass) => pass,
            Err(e) => {
                let decision = classification.decision(false).refused(&e.to_string());
                return Ok(self.deny(action_id, &intent, decision, trail, started));
            }
        };
        trail.push(ActionState::BoundaryCrossed);

        // Live evaluation against whatever governance and trust hold now.
        let governance = self.registry.current();
        let live = match classify(&intent, &governance, &self.ledger.grants()) {
            Ok(live) => live,
            Err(e) => {
                drop(pass);
                let decision = classification.decision(false).refused(&e.to_string());
                return Ok(self.deny(action_id, &intent, decision, trail, started));
            }
        };
        let mut decision = live.decision(false);
        if decision.tier < classification.tier {
            decision.tier = classification.tier;
            decision
                .rationale
                .push_str(&format!("; held at {} from classification", classification.tier));
        }
        let requires_approval = live.requires_approval
            || classification.requires_approval
            || decision.tier.requires_approval();
        trail.push(ActionState::LiveEvaluated);
        trail.push(ActionState::Decided);
        drop(pass);
        self.publish_decided(action_id, &decision);

        if !decision.allowed {
            return Ok(self.deny(action_id, &intent, decision, trail, started));
        }
        if requires_approval {
            trail.push(ActionState::ApprovalGated);
            if let Some(denied) = self.await_approval(action_id, &intent, &decision).await {
                return Ok(self.deny(action_id, &intent, denied, trail, started));
            }
        }

        self.execute(action_id, intent, verifier, decision, trail, started, false)
            .await
    }

    /// `None` when approved, otherwise the refused decision.
    async fn await_approval(
        &self,
        action_id: ActionId,
        intent: &ActionIntent,
        decision: &PolicyDecision,
    ) -> Option<PolicyDecision> {
        let response = self
            .approvals
            .request_approval(action_id, intent, decision, self.config.approval.timeout_secs)
            .await;
        let denial = match response {
            ApprovalResponse::Approved => {
                info!(%action_id, "action approved");
                return None;
            }
            ApprovalResponse::Denied => VigilError::ApprovalDenied("denied by approver".into()),
            ApprovalResponse::TimedOut => VigilError::ApprovalDenied("approval timed out".into()),
        };
        Some(decision.refused(&denial.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        action_id: ActionId,
        intent: ActionIntent,
        verifier: Arc<dyn Verifier>,
        decision: PolicyDecision,
        mut trail: Vec<ActionState>,
        started: Instant,
        background: bool,
    ) -> vigil_core::Result<ActionReport> {
        // T0/T1 work is admitted for its snapshot and counted by the queue
        // before it executes. A crossing then waits on the count, bounded by
        // its drain timeout, instead of on the execution itself.
        let admission = if background {
            Some(self.gate.admit().await)
        } else {
            None
        };

        let snapshotted = match (decision.tier.is_reversible(), intent.target()) {
            (true, Some(target)) => match self.rollback.snapshot(action_id, target) {
                Ok(_) => true,
                Err(e) => {
                    warn!(%action_id, error = %e, "snapshot failed, blocking action");
                    let refused = decision.refused(&e.to_string());
                    let report = self.deny(action_id, &intent, refused, trail, started);
                    drop(admission);
                    return Ok(report);
                }
            },
            _ => false,
        };
        let in_flight = background.then(|| self.queue.reserve());
        drop(admission);

        let mut record = TaskRecord {
            action_id,
            tier: decision.tier,
            intent,
            decision: decision.clone(),
            expected_outcome: ActionOutcome::default(),
            status: TaskStatus::Pending,
            enqueued_at: Utc::now(),
        };
        if snapshotted {
            // Journaled before execution so a crash mid-execution is still settled on restart.
            self.journal_task(&record);
        }

        trail.push(ActionState::Executing);
        let outcome = match self.backend.execute(&record.intent).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let report = self.execution_failed(record, e, snapshotted, trail, started);
                drop(in_flight);
                return Ok(report);
            }
        };
        record.expected_outcome = outcome.clone();
        trail.push(ActionState::Verifying);

        let task = VerificationTask::new(record, verifier).started_at(started);
        let report = if background {
            let handle = self.queue.enqueue(task).await;
            drop(in_flight);
            match handle.report {
                Some(report) => report,
                None => {
                    return Ok(ActionReport {
                        action_id,
                        decision,
                        status: ActionStatus::Queued,
                        trail,
                        outcome: Some(outcome),
                    });
                }
            }
        } else {
            self.queue.verify_now(task).await?
        };

        Ok(Self::settled(report, decision, trail, outcome))
    }

    fn settled(
        report: VerificationReport,
        decision: PolicyDecision,
        mut trail: Vec<ActionState>,
        outcome: ActionOutcome,
    ) -> ActionReport {
        let reason = report.failure.clone().unwrap_or_default();
        let status = match report.status {
            TaskStatus::Passed => {
                trail.push(ActionState::Verified);
                ActionStatus::Verified
            }
            TaskStatus::Failed if report.rollback.is_some() => {
                trail.push(ActionState::RolledBack);
                ActionStatus::RolledBack { reason }
            }
            TaskStatus::Cancelled => ActionStatus::Cancelled,
            TaskStatus::Failed | TaskStatus::Pending | TaskStatus::Running => {
                ActionStatus::Failed { reason }
            }
        };
        trail.push(ActionState::Receipted);
        ActionReport {
            action_id: report.action_id(),
            decision,
            status,
            trail,
            outcome: Some(outcome),
        }
    }

    fn execution_failed(
        &self,
        record: TaskRecord,
        error: VigilError,
        snapshotted: bool,
        mut trail: Vec<ActionState>,
        started: Instant,
    ) -> ActionReport {
        let action_id = record.action_id;
        let capability = record.intent.capability();
        warn!(%action_id, capability, error = %error, "execution failed");

        let rolled_back = snapshotted
            && match self.rollback.rollback(action_id) {
                Ok(_) => true,
                Err(e) => {
                    error!(
                        %action_id,
                        error = %e,
                        "rollback after failed execution did not complete"
                    );
                    false
                }
            };
        if snapshotted {
            self.journal_status(action_id, TaskStatus::Failed);
        }

        let reason = format!("execution failed: {error}");
        let (outcome, status) = if rolled_back {
            self.ledger.record_rollback(capability);
            trail.push(ActionState::RolledBack);
            (
                ReceiptOutcome::RolledBack {
                    reason: reason.clone(),
                },
                ActionStatus::RolledBack { reason },
            )
        } else {
            self.ledger.record_outcome(capability, false);
            (
                ReceiptOutcome::Failed {
                    reason: reason.clone(),
                },
                ActionStatus::Failed { reason },
            )
        };

        write_receipt(
            &self.buffer,
            action_id,
            &record.intent,
            record.decision.clone(),
            outcome,
            started.elapsed().as_millis() as u64,
        );
        trail.push(ActionState::Receipted);
        ActionReport {
            action_id,
            decision: record.decision,
            status,
            trail,
            outcome: None,
        }
    }

    fn deny(
        &self,
        action_id: ActionId,
        intent: &ActionIntent,
        decision: PolicyDecision,
        mut trail: Vec<ActionState>,
        started: Instant,
    ) -> ActionReport {
        info!(
            %action_id,
            capability = %intent.capability(),
            tier = %decision.tier,
            reason = %decision.rationale,
            "action denied"
        );
        if !trail.contains(&ActionState::Decided) {
            trail.push(ActionState::Decided);
            self.publish_decided(action_id, &decision);
        }
        let reason = decision.rationale.clone();
        write_receipt(
            &self.buffer,
            action_id,
            intent,
            decision.clone(),
            ReceiptOutcome::Denied {
                reason: reason.clone(),
            },
            started.elapsed().as_millis() as u64,
        );
        trail.push(ActionState::Receipted);
        ActionReport {
            action_id,
            decision,
            status: ActionStatus::Denied { reason },
            trail,
            outcome: None,
        }
    }

    /// Deny a T0/T1 action. Its receipt joins the batch buffer, so it is
    /// written under admission like the rest of the low-risk work.
    async fn deny_admitted(
        &self,
        action_id: ActionId,
        intent: &ActionIntent,
        decision: PolicyDecision,
        trail: Vec<ActionState>,
        started: Instant,
    ) -> ActionReport {
        let _admission = self.gate.admit().await;
        self.deny(action_id, intent, decision, trail, started)
    }

    fn publish_decided(&self, action_id: ActionId, decision: &PolicyDecision) {
        debug!(
            %action_id,
            tier = %decision.tier,
            allowed = decision.allowed,
            cache_hit = decision.cache_hit,
            version = %decision.governance_version,
            "action decided"
        );
        self.events.publish(Event::ActionDecided {
            action_id,
            allowed: decision.allowed,
            cache_hit: decision.cache_hit,
        });
    }

    fn journal_task(&self, record: &TaskRecord) {
        if let Some(journal) = &self.journal
            && let Err(e) = journal.record_task(record)
        {
            warn!(action_id = %record.action_id, error = %e, "failed to journal task");
        }
    }

    fn journal_status(&self, action_id: ActionId, status: TaskStatus) {
        if let Some(journal) = &self.journal
            && let Err(e) = journal.update_task(action_id, status)
        {
            warn!(%action_id, error = %e, "failed to journal task status");
        }
    }

    /// Settle work an unclean shutdown left behind: every non-terminal task
    /// is failed, its snapshot rolled back, its trust penalized, and its
    /// receipt written. Snapshots with no task are rolled back as well.
    pub fn recover(&self) -> vigil_core::Result<RecoveryReport> {
        let Some(journal) = &self.journal else {
            return Ok(RecoveryReport::default());
        };
        let tasks = journal.unfinished_tasks()?;
        let mut snapshots: HashMap<ActionId, Snapshot> = journal
            .unsettled_snapshots()?
            .into_iter()
            .map(|s| (s.action_id, s))
            .collect();
        let mut report = RecoveryReport::default();

        for task in tasks {
            let action_id = task.action_id;
            let capability = task.intent.capability();
            warn!(
                %action_id,
                capability,
                status = task.status.as_str(),
                "recovering unfinished verification task as failed"
            );

            let rolled_back = match snapshots.remove(&action_id) {
                Some(snapshot) => {
                    self.rollback.adopt(snapshot);
                    match self.rollback.rollback(action_id) {
                        Ok(_) => true,
                        Err(e) => {
                            error!(%action_id, error = %e, "recovery rollback failed");
                            false
                        }
                    }
                }
                None => false,
            };
            journal.update_task(action_id, TaskStatus::Failed)?;

            let reason = "unclean shutdown before verification completed".to_string();
            let outcome = if rolled_back {
                report.rolled_back += 1;
                self.ledger.record_rollback(capability);
                ReceiptOutcome::RolledBack { reason }
            } else {
                self.ledger.record_outcome(capability, false);
                ReceiptOutcome::Failed { reason }
            };
            write_receipt(
                &self.buffer,
                action_id,
                &task.intent,
                task.decision.clone(),
                outcome,
                0,
            );
            report.tasks_failed += 1;
        }

        for (action_id, snapshot) in snapshots {
            warn!(%action_id, target = %snapshot.target, "rolling back orphaned snapshot");
            self.rollback.adopt(snapshot);
            match self.rollback.rollback(action_id) {
                Ok(_) => report.orphans_rolled_back += 1,
                Err(e) => error!(%action_id, error = %e, "orphaned snapshot rollback failed"),
            }
        }

        self.buffer.flush()?;
        if report != RecoveryReport::default() {
            info!(
                tasks_failed = report.tasks_failed,
                rolled_back = report.rolled_back,
                orphans = report.orphans_rolled_back,
                "recovery complete"
            );
        }
        Ok(report)
    }

    /// Validate and activate a new governance document, then realign trust
    /// records and rebuild the policy cache for the new version.
    pub fn activate(&self, document: GovernanceDocument) -> vigil_core::Result<GovernanceVersion> {
        let governance = self.registry.activate(document)?;
        self.ledger.sync_with(governance.document());
        self.cache.rebuild(&governance, &self.ledger.grants());
        if let Some(journal) = &self.journal
            && let Err(e) =
                journal.record_activation(governance.version(), &governance.document().label)
        {
            warn!(
                version = %governance.version(),
                error = %e,
                "failed to persist governance version"
            );
        }
        Ok(governance.version())
    }

    /// Re-activate the configured governance document whenever it changes on
    /// disk. Returns `None` when no document is configured or watching is off.
    /// The watcher stops when the returned handle is dropped.
    pub fn watch_document(
        self: &Arc<Self>,
    ) -> vigil_core::Result<Option<notify::RecommendedWatcher>> {
        let Some(path) = self
            .config
            .governance
            .document
            .clone()
            .filter(|_| self.config.governance.watch)
        else {
            return Ok(None);
        };
        let governor = Arc::downgrade(self);
        let watcher = DocumentWatcher::watch(&path, move |document| {
            let Some(governor) = governor.upgrade() else {
                return;
            };
            match governor.activate(document) {
                Ok(version) => info!(%version, "governance document re-activated from disk"),
                Err(e) => warn!(
                    error = %e,
                    "changed governance document rejected, keeping current version"
                ),
            }
        })?;
        Ok(Some(watcher))
    }

    /// Cancel a queued verification that has not started.
    pub fn cancel(&self, action_id: ActionId) -> bool {
        self.queue.cancel(action_id)
    }

    pub fn authorize_graduation(
        &self,
        capability: &str,
        approved: bool,
    ) -> vigil_core::Result<RiskTier> {
        self.ledger.authorize(capability, approved)
    }

    pub fn revoke_graduation(&self, capability: &str, reason: &str) -> vigil_core::Result<()> {
        self.ledger.revoke(capability, reason)
    }

    pub fn pending_proposals(&self) -> Vec<GraduationProposal> {
        self.ledger
            .records()
            .into_iter()
            .filter_map(|r| r.pending_proposal)
            .collect()
    }

    pub fn trust_records(&self) -> Vec<TrustRecord> {
        self.ledger.records()
    }

    /// Wait for queued verifications to finish, then flush receipts.
    pub async fn settle(&self) -> vigil_core::Result<()> {
        let timeout = Duration::from_secs(self.config.verification.drain_timeout_secs);
        let failures = self.queue.drain(timeout).await?;
        if !failures.is_empty() {
            debug!(failures = failures.len(), "settled with failed verifications");
        }
        self.buffer.flush()?;
        Ok(())
    }

    /// Stop background work. Unfinished verifications stay journaled for
    /// recovery; buffered receipts are flushed.
    pub async fn shutdown(&self) -> vigil_core::Result<()> {
        let _ = self.shutdown_tx.send(true);
        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            let _ = flusher.await;
        }
        self.queue.shutdown(Duration::from_secs(5)).await;
        self.buffer.flush()?;
        info!("governor stopped");
        Ok(())
    }

    pub fn take_approval_receiver(&self) -> Option<mpsc::Receiver<PendingApproval>> {
        self.approvals.take_receiver()
    }

    pub fn version(&self) -> GovernanceVersion {
        self.registry.version()
    }

    pub fn registry(&self) -> &GovernanceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    pub fn ledger(&self) -> &TrustLedger {
        &self.ledger
    }

    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback
    }

    pub fn queue(&self) -> &VerificationQueue {
        &self.queue
    }

    pub fn receipts(&self) -> &ReceiptBuffer {
        &self.buffer
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }
}

impl Drop for Governor {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

//! Post-execution verification. T0/T1 tasks are verified by background
//! workers; T2/T3 tasks (and any task arriving at a saturated queue) are
//! verified on the caller's path.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vigil_config::schema::VerificationConfig;
use vigil_core::{
    ActionId, Event, EventBus, GovernanceJournal, ReceiptOutcome, TaskRecord, TaskStatus,
    Verifier, VigilError,
};

use crate::rollback::{RollbackManager, RollbackOutcome};

/// A task handed to the queue: the persisted record plus the predicate to run.
pub struct VerificationTask {
    pub record: TaskRecord,
    pub verifier: Arc<dyn Verifier>,
    /// When the governed action started. Receipt durations measure from here.
    pub started: Instant,
}

impl VerificationTask {
    pub fn new(record: TaskRecord, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            record,
            verifier,
            started: Instant::now(),
        }
    }

    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }
}

/// Terminal result of one verification task.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub record: TaskRecord,
    pub status: TaskStatus,
    pub failure: Option<String>,
    pub rollback: Option<RollbackOutcome>,
    pub duration_ms: u64,
}

impl VerificationReport {
    pub fn action_id(&self) -> ActionId {
        self.record.action_id
    }

    /// The receipt outcome this report resolves to.
    pub fn receipt_outcome(&self) -> ReceiptOutcome {
        let reason = self.failure.clone().unwrap_or_default();
        match self.status {
            TaskStatus::Passed => ReceiptOutcome::Verified,
            TaskStatus::Cancelled => ReceiptOutcome::Cancelled,
            TaskStatus::Failed if self.rollback.is_some() => ReceiptOutcome::RolledBack { reason },
            TaskStatus::Failed => ReceiptOutcome::Failed { reason },
            TaskStatus::Pending | TaskStatus::Running => ReceiptOutcome::Failed {
                reason: format!("verification left in non-terminal state {}", self.status.as_str()),
            },
        }
    }
}

/// A failed task, as reported by [`VerificationQueue::drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationFailure {
    pub action_id: ActionId,
    pub capability: String,
    pub reason: String,
}

/// Called exactly once per task when it reaches a terminal status, before the
/// queue counts it as finished.
pub trait VerificationHook: Send + Sync {
    fn on_terminal(&self, report: &VerificationReport);
}

/// Returned by [`VerificationQueue::enqueue`].
#[derive(Debug)]
pub struct VerificationHandle {
    pub action_id: ActionId,
    /// Set when the task was verified inline because the queue was saturated.
    pub report: Option<VerificationReport>,
}

impl VerificationHandle {
    pub fn is_inline(&self) -> bool {
        self.report.is_some()
    }
}

/// T0/T1 work that is executing but not queued yet. Counted in the queue
/// depth until dropped, so a drain waits for it (or times out on it).
pub struct InFlight {
    shared: Arc<QueueShared>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.shared.depth.send_modify(|d| *d = d.saturating_sub(1));
    }
}

struct TaskSlot {
    record: TaskRecord,
    status: Mutex<TaskStatus>,
    started: Instant,
    report: Mutex<Option<VerificationReport>>,
    /// Counted in the queue depth (T0/T1 work).
    counted: bool,
    /// Failure is reported by the next drain rather than to the caller.
    deferred: AtomicBool,
}

struct QueuedTask {
    slot: Arc<TaskSlot>,
    verifier: Arc<dyn Verifier>,
}

struct QueueShared {
    slots: DashMap<ActionId, Arc<TaskSlot>>,
    /// Tasks admitted but not yet terminal, plus outstanding reservations.
    depth: watch::Sender<usize>,
    /// Failures since the last drain.
    failures: Mutex<Vec<VerificationFailure>>,
    rollback: Arc<RollbackManager>,
    hook: Arc<dyn VerificationHook>,
    journal: Option<Arc<dyn GovernanceJournal>>,
    task_timeout: Duration,
    events: EventBus,
}

impl QueueShared {
    fn journal_status(&self, action_id: ActionId, status: TaskStatus) {
        if let Some(journal) = &self.journal
            && let Err(e) = journal.update_task(action_id, status)
        {
            warn!(
                %action_id,
                status = status.as_str(),
                error = %e,
                "failed to journal task status"
            );
        }
    }

    async fn run(&self, task: QueuedTask) -> Option<VerificationReport> {
        let slot = task.slot;
        let action_id = slot.record.action_id;
        {
            let mut status = slot.status.lock();
            if *status != TaskStatus::Pending {
                // Cancelled while queued; the cancel path already settled it.
                return slot.report.lock().clone();
            }
            *status = TaskStatus::Running;
        }
        self.journal_status(action_id, TaskStatus::Running);

        let verdict = tokio::time::timeout(
            self.task_timeout,
            task.verifier
                .verify(&slot.record.intent, &slot.record.expected_outcome),
        )
        .await;

        let failure = match verdict {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some("verification predicate rejected the outcome".to_string()),
            Ok(Err(e)) => Some(format!("verifier error: {e}")),
            Err(_) => Some(
                VigilError::VerificationTimeout {
                    action_id,
                    timeout_secs: self.task_timeout.as_secs(),
                }
                .to_string(),
            ),
        };
        let status = if failure.is_none() {
            TaskStatus::Passed
        } else {
            TaskStatus::Failed
        };
        Some(self.finish(&slot, status, failure))
    }

    fn finish(
        &self,
        slot: &TaskSlot,
        status: TaskStatus,
        mut failure: Option<String>,
    ) -> VerificationReport {
        let action_id = slot.record.action_id;
        let capability = slot.record.intent.capability().to_string();
        let mut rollback = None;

        if status == TaskStatus::Passed {
            self.rollback.release(action_id);
            self.events.publish(Event::VerificationPassed { action_id });
        } else if self.rollback.has_snapshot(action_id) {
            // Undo before the task turns terminal.
            match self.rollback.rollback(action_id) {
                Ok(outcome) => rollback = Some(outcome),
                Err(e) => {
                    error!(
                        %action_id,
                        error = %e,
                        "rollback after failed verification did not complete"
                    );
                    let reason = failure.take().unwrap_or_default();
                    failure = Some(format!("{reason}; rollback failed: {e}"));
                }
            }
        }

        *slot.status.lock() = status;
        self.journal_status(action_id, status);

        if status == TaskStatus::Failed {
            let reason = failure.clone().unwrap_or_default();
            warn!(%action_id, capability = %capability, reason = %reason, "verification failed");
            if slot.deferred.load(Ordering::Acquire) {
                self.failures.lock().push(VerificationFailure {
                    action_id,
                    capability,
                    reason: reason.clone(),
                });
            }
            self.events
                .publish(Event::VerificationFailed { action_id, reason });
        }

        let report = VerificationReport {
            record: slot.record.clone(),
            status,
            failure,
            rollback,
            duration_ms: slot.started.elapsed().as_millis() as u64,
        };
        *slot.report.lock() = Some(report.clone());

        self.hook.on_terminal(&report);
        if slot.counted {
            self.slots.remove(&action_id);
            self.depth.send_modify(|d| *d = d.saturating_sub(1));
        }
        report
    }
}

/// Bounded verification queue with a pool of background workers.
pub struct VerificationQueue {
    shared: Arc<QueueShared>,
    tx: mpsc::Sender<QueuedTask>,
    max_depth: usize,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl VerificationQueue {
    /// Create the queue and spawn its workers. Must be called within a Tokio runtime.
    pub fn start(
        config: &VerificationConfig,
        rollback: Arc<RollbackManager>,
        hook: Arc<dyn VerificationHook>,
        journal: Option<Arc<dyn GovernanceJournal>>,
        events: EventBus,
    ) -> Self {
        let (depth, _) = watch::channel(0usize);
        let shared = Arc::new(QueueShared {
            slots: DashMap::new(),
            depth,
            failures: Mutex::new(Vec::new()),
            rollback,
            hook,
            journal,
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            events,
        });

        let (tx, rx) = mpsc::channel(config.max_queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let (shutdown_tx, _) = watch::channel(false);

        let workers = (0..config.workers.max(1))
            .map(|index| {
                spawn_worker(
                    index,
                    shared.clone(),
                    rx.clone(),
                    shutdown_tx.subscribe(),
                )
            })
            .collect();

        info!(
            workers = config.workers.max(1),
            max_depth = config.max_queue_depth,
            "verification queue started"
        );

        Self {
            shared,
            tx,
            max_depth: config.max_queue_depth,
            shutdown_tx,
            workers: Mutex::new(workers),
        }
    }

    fn admit(&self, task: VerificationTask, counted: bool) -> (QueuedTask, bool) {
        let VerificationTask {
            mut record,
            verifier,
            started,
        } = task;
        record.status = TaskStatus::Pending;
        let action_id = record.action_id;

        let journaled = match &self.shared.journal {
            Some(journal) => match journal.record_task(&record) {
                Ok(()) => true,
                Err(e) => {
                    warn!(%action_id, error = %e, "failed to journal verification task");
                    false
                }
            },
            None => true,
        };

        let slot = Arc::new(TaskSlot {
            record,
            status: Mutex::new(TaskStatus::Pending),
            started,
            report: Mutex::new(None),
            counted,
            deferred: AtomicBool::new(counted),
        });
        if counted {
            self.shared.slots.insert(action_id, slot.clone());
            self.shared.depth.send_modify(|d| *d += 1);
        }
        (QueuedTask { slot, verifier }, journaled)
    }

    /// Count work that will be enqueued once it finishes executing. Drop the
    /// returned guard after [`enqueue`](Self::enqueue), or once the work has
    /// been receipted on a path that never reaches the queue.
    pub fn reserve(&self) -> InFlight {
        self.shared.depth.send_modify(|d| *d += 1);
        InFlight {
            shared: self.shared.clone(),
        }
    }

    /// Queue a task for background verification. When the queue is saturated,
    /// or the task could not be journaled, it is verified inline instead.
    pub async fn enqueue(&self, task: VerificationTask) -> VerificationHandle {
        let action_id = task.record.action_id;
        let saturated = self.shared.slots.len() >= self.max_depth;
        let (queued, journaled) = self.admit(task, true);

        if saturated || !journaled {
            debug!(%action_id, saturated, "verifying on the caller path");
            queued.slot.deferred.store(false, Ordering::Release);
            let report = self.shared.run(queued).await;
            return VerificationHandle { action_id, report };
        }

        match self.tx.try_send(queued) {
            Ok(()) => {
                debug!(%action_id, "verification queued");
                VerificationHandle {
                    action_id,
                    report: None,
                }
            }
            Err(TrySendError::Full(queued)) | Err(TrySendError::Closed(queued)) => {
                debug!(%action_id, "queue unavailable, verifying on the caller path");
                queued.slot.deferred.store(false, Ordering::Release);
                let report = self.shared.run(queued).await;
                VerificationHandle { action_id, report }
            }
        }
    }

    /// Verify synchronously on the caller's path. Used for T2/T3, which never
    /// count towards the queue depth; the failure goes to the caller.
    pub async fn verify_now(
        &self,
        task: VerificationTask,
    ) -> vigil_core::Result<VerificationReport> {
        let action_id = task.record.action_id;
        let (queued, _) = self.admit(task, false);
        self.shared
            .run(queued)
            .await
            .ok_or(VigilError::UnknownAction(action_id))
    }

    /// Wait until every queued task is terminal. Returns (and clears) the
    /// failures of background-verified tasks recorded since the previous drain.
    pub async fn drain(&self, timeout: Duration) -> vigil_core::Result<Vec<VerificationFailure>> {
        let mut depth = self.shared.depth.subscribe();
        let quiesced = tokio::time::timeout(timeout, async {
            depth.wait_for(|d| *d == 0).await.map(|_| ())
        })
        .await;

        match quiesced {
            Ok(Ok(())) => Ok(std::mem::take(&mut *self.shared.failures.lock())),
            Ok(Err(_)) => Err(VigilError::BoundaryCrossingRefused {
                reason: "verification queue closed while draining".into(),
                failed_actions: vec![],
            }),
            Err(_) => Err(VigilError::BoundaryCrossingRefused {
                reason: format!(
                    "{} verification task(s) still pending after {}s",
                    self.pending(),
                    timeout.as_secs()
                ),
                failed_actions: vec![],
            }),
        }
    }

    /// Cancel a task that has not started yet. Its snapshot is rolled back and
    /// the task settles as cancelled. Returns `false` if it already started.
    pub fn cancel(&self, action_id: ActionId) -> bool {
        let Some(slot) = self.shared.slots.get(&action_id).map(|s| s.clone()) else {
            return false;
        };
        {
            let mut status = slot.status.lock();
            if *status != TaskStatus::Pending {
                return false;
            }
            *status = TaskStatus::Cancelled;
        }
        info!(%action_id, "verification cancelled");
        self.shared.finish(&slot, TaskStatus::Cancelled, None);
        true
    }

    pub fn status(&self, action_id: ActionId) -> Option<TaskStatus> {
        self.shared.slots.get(&action_id).map(|s| *s.status.lock())
    }

    /// Tasks admitted but not yet terminal, plus reserved work still executing.
    pub fn pending(&self) -> usize {
        *self.shared.depth.borrow()
    }

    /// Stop the workers. Tasks still queued stay non-terminal in the journal
    /// and are settled by recovery on the next start.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let abort = worker.abort_handle();
            if tokio::time::timeout(grace, worker).await.is_err() {
                warn!("verification worker did not stop in time, aborting");
                abort.abort();
            }
        }
        info!(pending = self.pending(), "verification queue stopped");
    }
}

impl Drop for VerificationQueue {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn spawn_worker(
    index: usize,
    shared: Arc<QueueShared>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedTask>>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(worker = index, "verification worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = shutdown.changed() => None,
                    task = rx.recv() => task,
                }
            };
            let Some(task) = next else {
                break;
            };
            shared.run(task).await;
        }
        debug!(worker = index, "verification worker stopped");
    })
}

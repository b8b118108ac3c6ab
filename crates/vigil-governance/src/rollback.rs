//! Pre-execution snapshots and exactly-once rollback for reversible actions.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vigil_core::{
    ActionId, Event, EventBus, GovernanceJournal, PriorState, Snapshot, SnapshotDisposition,
    StateStore, VigilError,
};

/// What a successful `rollback` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Prior content was written back.
    Restored,
    /// The target did not exist before the action and was removed.
    Removed,
    /// Already rolled back by an earlier call; nothing changed.
    AlreadyRolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Live,
    Released,
    RolledBack,
    Evicted,
}

struct SnapshotEntry {
    snapshot: Snapshot,
    /// Per-action lock; every state transition is a check-and-set under it.
    state: Mutex<EntryState>,
}

#[derive(Default)]
struct SnapshotTable {
    entries: HashMap<ActionId, Arc<SnapshotEntry>>,
    /// Live snapshots, oldest first.
    live: VecDeque<ActionId>,
    /// Settled snapshots kept so repeated calls stay idempotent, oldest first.
    settled: VecDeque<ActionId>,
}

impl SnapshotTable {
    fn settle(&mut self, action_id: ActionId, history: usize) {
        self.live.retain(|id| *id != action_id);
        self.settled.push_back(action_id);
        while self.settled.len() > history {
            if let Some(old) = self.settled.pop_front() {
                self.entries.remove(&old);
            }
        }
    }
}

/// Captures prior state before T1/T2 execution and restores it on failure.
pub struct RollbackManager {
    store: Arc<dyn StateStore>,
    journal: Option<Arc<dyn GovernanceJournal>>,
    max_snapshots: usize,
    table: Mutex<SnapshotTable>,
    events: EventBus,
}

impl RollbackManager {
    pub fn new(store: Arc<dyn StateStore>, max_snapshots: usize, events: EventBus) -> Self {
        Self {
            store,
            journal: None,
            max_snapshots: max_snapshots.max(1),
            table: Mutex::new(SnapshotTable::default()),
            events,
        }
    }

    /// Persist snapshots so they survive an unclean shutdown.
    pub fn with_journal(mut self, journal: Arc<dyn GovernanceJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    fn history_len(&self) -> usize {
        self.max_snapshots * 4
    }

    /// Capture the prior state of `target` for `action_id`.
    ///
    /// Fails if the state cannot be read or persisted; the action must not
    /// execute without a snapshot.
    pub fn snapshot(&self, action_id: ActionId, target: &str) -> vigil_core::Result<Snapshot> {
        let failure = |reason: String| VigilError::SnapshotFailure {
            target: target.to_string(),
            reason,
        };

        if self.table.lock().entries.contains_key(&action_id) {
            return Err(failure(format!("action {action_id} already has a snapshot")));
        }

        let prior = match self.store.read(target) {
            Ok(Some(bytes)) => PriorState::Content { bytes },
            Ok(None) => PriorState::Absent,
            Err(e) => return Err(failure(e.to_string())),
        };
        let snapshot = Snapshot {
            action_id,
            target: target.to_string(),
            prior,
            created_at: Utc::now(),
        };

        if let Some(journal) = &self.journal {
            journal
                .record_snapshot(&snapshot)
                .map_err(|e| failure(format!("snapshot could not be persisted: {e}")))?;
        }

        self.insert_live(snapshot.clone());
        debug!(%action_id, target, "snapshot captured");
        Ok(snapshot)
    }

    /// Take ownership of a snapshot recovered from the journal.
    pub fn adopt(&self, snapshot: Snapshot) {
        let mut table = self.table.lock();
        if table.entries.contains_key(&snapshot.action_id) {
            return;
        }
        let action_id = snapshot.action_id;
        table.entries.insert(
            action_id,
            Arc::new(SnapshotEntry {
                snapshot,
                state: Mutex::new(EntryState::Live),
            }),
        );
        table.live.push_back(action_id);
    }

    fn insert_live(&self, snapshot: Snapshot) {
        let action_id = snapshot.action_id;
        let mut table = self.table.lock();
        table.entries.insert(
            action_id,
            Arc::new(SnapshotEntry {
                snapshot,
                state: Mutex::new(EntryState::Live),
            }),
        );
        table.live.push_back(action_id);

        while table.live.len() > self.max_snapshots {
            let Some(oldest) = table.live.pop_front() else {
                break;
            };
            let Some(entry) = table.entries.get(&oldest).cloned() else {
                continue;
            };
            let mut state = entry.state.lock();
            if *state != EntryState::Live {
                continue;
            }
            *state = EntryState::Evicted;
            drop(state);
            warn!(
                action_id = %oldest,
                target = %entry.snapshot.target,
                "governance integrity: evicting unsettled snapshot, the action can no longer be rolled back"
            );
            self.journal_settle(oldest, SnapshotDisposition::Evicted);
            let history = self.history_len();
            table.settle(oldest, history);
        }
    }

    fn entry(&self, action_id: ActionId) -> Option<Arc<SnapshotEntry>> {
        self.table.lock().entries.get(&action_id).cloned()
    }

    fn settle(&self, action_id: ActionId, disposition: SnapshotDisposition) {
        self.journal_settle(action_id, disposition);
        let history = self.history_len();
        self.table.lock().settle(action_id, history);
    }

    fn journal_settle(&self, action_id: ActionId, disposition: SnapshotDisposition) {
        if let Some(journal) = &self.journal
            && let Err(e) = journal.settle_snapshot(action_id, disposition)
        {
            error!(
                %action_id,
                disposition = disposition.as_str(),
                error = %e,
                "failed to journal snapshot settlement"
            );
        }
    }

    /// Restore the prior state captured for `action_id`. Consumes the snapshot
    /// exactly once; later calls return [`RollbackOutcome::AlreadyRolledBack`].
    pub fn rollback(&self, action_id: ActionId) -> vigil_core::Result<RollbackOutcome> {
        let entry = self
            .entry(action_id)
            .ok_or(VigilError::UnknownAction(action_id))?;

        let mut state = entry.state.lock();
        match *state {
            EntryState::RolledBack => {
                debug!(%action_id, "rollback already applied");
                return Ok(RollbackOutcome::AlreadyRolledBack);
            }
            EntryState::Released => {
                return Err(VigilError::RollbackFailed {
                    action_id,
                    reason: "snapshot was already released after a passed verification".into(),
                });
            }
            EntryState::Evicted => {
                return Err(VigilError::RollbackFailed {
                    action_id,
                    reason: "snapshot was evicted by retention".into(),
                });
            }
            EntryState::Live => {}
        }

        let target = &entry.snapshot.target;
        let restored = match &entry.snapshot.prior {
            PriorState::Content { bytes } => self
                .store
                .write(target, bytes)
                .map(|_| RollbackOutcome::Restored),
            PriorState::Absent => self.store.remove(target).map(|_| RollbackOutcome::Removed),
        };
        let outcome = restored.map_err(|e| {
            error!(%action_id, target = %target, error = %e, "rollback failed");
            VigilError::RollbackFailed {
                action_id,
                reason: e.to_string(),
            }
        })?;

        *state = EntryState::RolledBack;
        drop(state);

        self.settle(action_id, SnapshotDisposition::RolledBack);
        info!(%action_id, target = %target, ?outcome, "rolled back");
        self.events.publish(Event::RolledBack { action_id });
        Ok(outcome)
    }

    /// Discard the snapshot after a passed verification.
    /// Returns `false` if there was nothing live to release.
    pub fn release(&self, action_id: ActionId) -> bool {
        let Some(entry) = self.entry(action_id) else {
            return false;
        };
        let mut state = entry.state.lock();
        match *state {
            EntryState::Live => {
                *state = EntryState::Released;
                drop(state);
                self.settle(action_id, SnapshotDisposition::Released);
                debug!(%action_id, "snapshot released");
                true
            }
            EntryState::Evicted => {
                warn!(%action_id, "verification passed after the snapshot was evicted");
                false
            }
            EntryState::Released | EntryState::RolledBack => false,
        }
    }

    /// Whether `action_id` has a snapshot that can still be rolled back or released.
    pub fn is_live(&self, action_id: ActionId) -> bool {
        self.entry(action_id)
            .is_some_and(|e| *e.state.lock() == EntryState::Live)
    }

    /// Whether a snapshot was ever captured (and is still tracked) for `action_id`.
    pub fn has_snapshot(&self, action_id: ActionId) -> bool {
        self.table.lock().entries.contains_key(&action_id)
    }

    /// Number of live (unsettled) snapshots.
    pub fn live_count(&self) -> usize {
        self.table.lock().live.len()
    }
}

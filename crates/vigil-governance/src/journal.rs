use parking_lot::Mutex;
use std::collections::HashMap;
use vigil_core::{
    ActionId, GovernanceJournal, GovernanceVersion, Snapshot, SnapshotDisposition, TaskRecord,
    TaskStatus, VigilError,
};

#[derive(Default)]
struct JournalState {
    snapshots: HashMap<ActionId, (Snapshot, Option<SnapshotDisposition>)>,
    tasks: HashMap<ActionId, TaskRecord>,
    activation: Option<(GovernanceVersion, String)>,
}

/// In-process [`GovernanceJournal`]. Survives a pipeline restart only when
/// shared between instances, which is what tests use it for.
#[derive(Default)]
pub struct MemoryJournal {
    state: Mutex<JournalState>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_status(&self, action_id: ActionId) -> Option<TaskStatus> {
        self.state.lock().tasks.get(&action_id).map(|t| t.status)
    }

    pub fn snapshot_disposition(&self, action_id: ActionId) -> Option<SnapshotDisposition> {
        self.state
            .lock()
            .snapshots
            .get(&action_id)
            .and_then(|(_, d)| *d)
    }
}

impl GovernanceJournal for MemoryJournal {
    fn record_snapshot(&self, snapshot: &Snapshot) -> vigil_core::Result<()> {
        self.state
            .lock()
            .snapshots
            .insert(snapshot.action_id, (snapshot.clone(), None));
        Ok(())
    }

    fn settle_snapshot(
        &self,
        action_id: ActionId,
        disposition: SnapshotDisposition,
    ) -> vigil_core::Result<()> {
        match self.state.lock().snapshots.get_mut(&action_id) {
            Some((_, slot)) => {
                *slot = Some(disposition);
                Ok(())
            }
            None => Err(VigilError::UnknownAction(action_id)),
        }
    }

    fn record_task(&self, task: &TaskRecord) -> vigil_core::Result<()> {
        self.state.lock().tasks.insert(task.action_id, task.clone());
        Ok(())
    }

    fn update_task(&self, action_id: ActionId, status: TaskStatus) -> vigil_core::Result<()> {
        match self.state.lock().tasks.get_mut(&action_id) {
            Some(task) => {
                task.status = status;
                Ok(())
            }
            None => Err(VigilError::UnknownAction(action_id)),
        }
    }

    fn unsettled_snapshots(&self) -> vigil_core::Result<Vec<Snapshot>> {
        let mut snapshots: Vec<Snapshot> = self
            .state
            .lock()
            .snapshots
            .values()
            .filter(|(_, d)| d.is_none())
            .map(|(s, _)| s.clone())
            .collect();
        snapshots.sort_by_key(|s| s.created_at);
        Ok(snapshots)
    }

    fn unfinished_tasks(&self) -> vigil_core::Result<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self
            .state
            .lock()
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.enqueued_at);
        Ok(tasks)
    }

    fn record_activation(&self, version: GovernanceVersion, label: &str) -> vigil_core::Result<()> {
        self.state.lock().activation = Some((version, label.to_string()));
        Ok(())
    }

    fn last_activation(&self) -> vigil_core::Result<Option<GovernanceVersion>> {
        Ok(self.state.lock().activation.as_ref().map(|(v, _)| *v))
    }
}

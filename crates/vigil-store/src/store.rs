use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_core::{
    ActionId, BatchArtifact, GovernanceJournal, GovernanceVersion, PriorState, Receipt,
    ReceiptSink, Snapshot, SnapshotDisposition, TaskRecord, TaskStatus, TrustRecord, TrustStore,
    VigilError,
};

fn db_err(e: rusqlite::Error) -> VigilError {
    VigilError::Store(e.to_string())
}

fn parse_time(raw: &str) -> vigil_core::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| VigilError::Store(format!("bad timestamp '{raw}': {e}")))
}

fn parse_id(raw: &str) -> vigil_core::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| VigilError::Store(format!("bad id '{raw}': {e}")))
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS batches (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        receipt_count INTEGER NOT NULL,
        hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS receipts (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        action_id TEXT NOT NULL,
        batch_id TEXT REFERENCES batches(id),
        capability TEXT NOT NULL,
        tier INTEGER NOT NULL,
        outcome TEXT NOT NULL,
        body TEXT NOT NULL,
        hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TRIGGER IF NOT EXISTS receipts_no_update BEFORE UPDATE ON receipts
    BEGIN SELECT RAISE(ABORT, 'receipts are append-only'); END;
    CREATE TRIGGER IF NOT EXISTS receipts_no_delete BEFORE DELETE ON receipts
    BEGIN SELECT RAISE(ABORT, 'receipts are append-only'); END;

    CREATE TABLE IF NOT EXISTS trust (
        capability TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS snapshots (
        action_id TEXT PRIMARY KEY,
        target TEXT NOT NULL,
        prior_kind TEXT NOT NULL,
        prior BLOB,
        disposition TEXT,
        created_at TEXT NOT NULL,
        settled_at TEXT
    );

    CREATE TABLE IF NOT EXISTS tasks (
        action_id TEXT PRIMARY KEY,
        tier INTEGER NOT NULL,
        capability TEXT NOT NULL,
        body TEXT NOT NULL,
        status TEXT NOT NULL,
        enqueued_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS activations (
        version INTEGER PRIMARY KEY,
        label TEXT NOT NULL,
        activated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_receipts_action ON receipts(action_id);
    CREATE INDEX IF NOT EXISTS idx_receipts_batch ON receipts(batch_id);
    CREATE INDEX IF NOT EXISTS idx_snapshots_open ON snapshots(disposition);
    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
";

/// SQLite-backed receipt sink, trust store, and governance journal.
///
/// Cloning is cheap and shares the connection.
#[derive(Clone)]
pub struct GovernanceStore {
    db: Arc<Mutex<Connection>>,
}

impl GovernanceStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> vigil_core::Result<Self> {
        info!(?path, "opening governance store");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for tests and dry runs).
    pub fn open_in_memory() -> vigil_core::Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> vigil_core::Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )
        .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Raw connection, for inspection and maintenance.
    pub fn db(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.db.lock()
    }

    // ── Receipt log ────────────────────────────────────────────

    fn insert_receipt(
        conn: &Connection,
        receipt: &Receipt,
        batch_id: Option<String>,
    ) -> vigil_core::Result<()> {
        let body = serde_json::to_string(receipt)?;
        conn.execute(
            "INSERT INTO receipts (id, action_id, batch_id, capability, tier, outcome, body, hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                receipt.id.to_string(),
                receipt.action_id.to_string(),
                batch_id,
                receipt.capability,
                receipt.tier as i64,
                receipt.outcome.kind(),
                body,
                receipt.hash,
                receipt.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn query_receipts(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> vigil_core::Result<Vec<Receipt>> {
        let bodies: Vec<String> = {
            let db = self.db.lock();
            let mut stmt = db.prepare(sql).map_err(db_err)?;
            stmt.query_map(args, |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<Result<_, _>>()
                .map_err(db_err)?
        };
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(VigilError::from))
            .collect()
    }

    /// The most recent receipts, newest first, individual and batched alike.
    pub fn list_receipts(&self, limit: usize) -> vigil_core::Result<Vec<Receipt>> {
        self.query_receipts(
            "SELECT body FROM receipts ORDER BY seq DESC LIMIT ?1",
            params![limit.min(i64::MAX as usize) as i64],
        )
    }

    pub fn receipts_for_action(&self, action_id: ActionId) -> vigil_core::Result<Vec<Receipt>> {
        self.query_receipts(
            "SELECT body FROM receipts WHERE action_id = ?1 ORDER BY seq",
            params![action_id.to_string()],
        )
    }

    pub fn receipt_count(&self) -> vigil_core::Result<usize> {
        let db = self.db.lock();
        let count: i64 = db
            .query_row("SELECT COUNT(*) FROM receipts", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count as usize)
    }

    /// The most recent batch artifacts, newest first, with their members in order.
    pub fn list_batches(&self, limit: usize) -> vigil_core::Result<Vec<BatchArtifact>> {
        let headers: Vec<(String, String, String)> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare("SELECT id, hash, created_at FROM batches ORDER BY seq DESC LIMIT ?1")
                .map_err(db_err)?;
            stmt.query_map(params![limit.min(i64::MAX as usize) as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(db_err)?
            .collect::<Result<_, _>>()
            .map_err(db_err)?
        };

        headers
            .into_iter()
            .map(|(id, hash, created_at)| -> vigil_core::Result<BatchArtifact> {
                let receipts = self.query_receipts(
                    "SELECT body FROM receipts WHERE batch_id = ?1 ORDER BY seq",
                    params![id],
                )?;
                Ok(BatchArtifact {
                    id: parse_id(&id)?,
                    receipts,
                    created_at: parse_time(&created_at)?,
                    hash,
                })
            })
            .collect()
    }

    /// Recompute every stored hash. Returns the ids of receipts and batches
    /// whose content no longer matches.
    pub fn verify_integrity(&self) -> vigil_core::Result<Vec<Uuid>> {
        let rows: Vec<(String, String)> = {
            let db = self.db.lock();
            let mut stmt = db.prepare("SELECT id, body FROM receipts").map_err(db_err)?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(db_err)?
                .collect::<Result<_, _>>()
                .map_err(db_err)?
        };

        let mut corrupt = Vec::new();
        for (id, body) in rows {
            let intact = serde_json::from_str::<Receipt>(&body)
                .is_ok_and(|r| r.id.to_string() == id && r.verify_integrity());
            if !intact {
                warn!(receipt_id = %id, "stored receipt failed integrity check");
                corrupt.push(parse_id(&id)?);
            }
        }

        for batch in self.list_batches(usize::MAX)? {
            if !batch.verify_integrity() {
                warn!(batch_id = %batch.id, "stored batch failed integrity check");
                corrupt.push(batch.id);
            }
        }
        Ok(corrupt)
    }

    // ── Journal reads ──────────────────────────────────────────

    fn read_snapshot(
        action_id: &str,
        target: String,
        prior_kind: &str,
        prior: Option<Vec<u8>>,
        created_at: &str,
    ) -> vigil_core::Result<Snapshot> {
        let prior = match (prior_kind, prior) {
            ("content", Some(bytes)) => PriorState::Content { bytes },
            ("absent", _) => PriorState::Absent,
            (kind, _) => {
                return Err(VigilError::Store(format!(
                    "snapshot {action_id} has unreadable prior state '{kind}'"
                )));
            }
        };
        Ok(Snapshot {
            action_id: parse_id(action_id)?,
            target,
            prior,
            created_at: parse_time(created_at)?,
        })
    }

    /// Settlement of a journaled snapshot; `None` while still unsettled.
    pub fn snapshot_disposition(
        &self,
        action_id: ActionId,
    ) -> vigil_core::Result<Option<String>> {
        let db = self.db.lock();
        db.query_row(
            "SELECT disposition FROM snapshots WHERE action_id = ?1",
            params![action_id.to_string()],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .map_err(db_err)
        .map(Option::flatten)
    }

    pub fn task_status(&self, action_id: ActionId) -> vigil_core::Result<Option<TaskStatus>> {
        let db = self.db.lock();
        let status: Option<String> = db
            .query_row(
                "SELECT status FROM tasks WHERE action_id = ?1",
                params![action_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(status.as_deref().and_then(TaskStatus::parse))
    }
}

impl ReceiptSink for GovernanceStore {
    fn append_receipt(&self, receipt: &Receipt) -> vigil_core::Result<()> {
        if !receipt.verify_integrity() {
            return Err(VigilError::Integrity(format!(
                "receipt {} does not match its hash",
                receipt.id
            )));
        }
        let db = self.db.lock();
        Self::insert_receipt(&db, receipt, None)?;
        debug!(receipt_id = %receipt.id, action_id = %receipt.action_id, "receipt stored");
        Ok(())
    }

    /// The batch and all of its members land in one transaction.
    fn append_batch(&self, batch: &BatchArtifact) -> vigil_core::Result<()> {
        if !batch.verify_integrity() {
            return Err(VigilError::Integrity(format!(
                "batch {} does not match its hash",
                batch.id
            )));
        }
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO batches (id, receipt_count, hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                batch.id.to_string(),
                batch.len() as i64,
                batch.hash,
                batch.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        for receipt in &batch.receipts {
            Self::insert_receipt(&tx, receipt, Some(batch.id.to_string()))?;
        }
        tx.commit().map_err(db_err)?;
        debug!(batch_id = %batch.id, receipts = batch.len(), "batch stored");
        Ok(())
    }
}

impl TrustStore for GovernanceStore {
    fn save_trust(&self, record: &TrustRecord) -> vigil_core::Result<()> {
        let body = serde_json::to_string(record)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO trust (capability, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(capability) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![record.capability, body, record.updated_at.to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn load_trust(&self) -> vigil_core::Result<Vec<TrustRecord>> {
        let rows: Vec<(String, String)> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare("SELECT capability, body FROM trust ORDER BY capability")
                .map_err(db_err)?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(db_err)?
                .collect::<Result<_, _>>()
                .map_err(db_err)?
        };
        Ok(rows
            .into_iter()
            .filter_map(|(capability, body)| match serde_json::from_str(&body) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(capability = %capability, error = %e, "skipping unreadable trust record");
                    None
                }
            })
            .collect())
    }
}

impl GovernanceJournal for GovernanceStore {
    fn record_snapshot(&self, snapshot: &Snapshot) -> vigil_core::Result<()> {
        let (kind, bytes) = match &snapshot.prior {
            PriorState::Content { bytes } => ("content", Some(bytes.as_slice())),
            PriorState::Absent => ("absent", None),
        };
        let db = self.db.lock();
        db.execute(
            "INSERT INTO snapshots (action_id, target, prior_kind, prior, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snapshot.action_id.to_string(),
                snapshot.target,
                kind,
                bytes,
                snapshot.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn settle_snapshot(
        &self,
        action_id: ActionId,
        disposition: SnapshotDisposition,
    ) -> vigil_core::Result<()> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "UPDATE snapshots SET disposition = ?2, settled_at = ?3 WHERE action_id = ?1",
                params![
                    action_id.to_string(),
                    disposition.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(db_err)?;
        if rows == 0 {
            return Err(VigilError::UnknownAction(action_id));
        }
        Ok(())
    }

    fn record_task(&self, task: &TaskRecord) -> vigil_core::Result<()> {
        let body = serde_json::to_string(task)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO tasks (action_id, tier, capability, body, status, enqueued_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(action_id) DO UPDATE SET
                body = excluded.body,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                task.action_id.to_string(),
                task.tier as i64,
                task.intent.capability(),
                body,
                task.status.as_str(),
                task.enqueued_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn update_task(&self, action_id: ActionId, status: TaskStatus) -> vigil_core::Result<()> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE action_id = ?1",
                params![action_id.to_string(), status.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        if rows == 0 {
            return Err(VigilError::UnknownAction(action_id));
        }
        Ok(())
    }

    fn unsettled_snapshots(&self) -> vigil_core::Result<Vec<Snapshot>> {
        type Row = (String, String, String, Option<Vec<u8>>, String);
        let rows: Vec<Row> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare(
                    "SELECT action_id, target, prior_kind, prior, created_at FROM snapshots
                     WHERE disposition IS NULL ORDER BY created_at",
                )
                .map_err(db_err)?;
            stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })
            .map_err(db_err)?
            .collect::<Result<_, _>>()
            .map_err(db_err)?
        };
        rows.into_iter()
            .map(|(id, target, kind, prior, created_at)| {
                Self::read_snapshot(&id, target, &kind, prior, &created_at)
            })
            .collect()
    }

    fn unfinished_tasks(&self) -> vigil_core::Result<Vec<TaskRecord>> {
        let rows: Vec<(String, String)> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare(
                    "SELECT body, status FROM tasks
                     WHERE status IN ('pending', 'running') ORDER BY enqueued_at",
                )
                .map_err(db_err)?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(db_err)?
                .collect::<Result<_, _>>()
                .map_err(db_err)?
        };
        rows.into_iter()
            .map(|(body, status)| -> vigil_core::Result<TaskRecord> {
                let mut task: TaskRecord = serde_json::from_str(&body)?;
                // The status column is authoritative; the body is written once per admission.
                task.status = TaskStatus::parse(&status).unwrap_or(TaskStatus::Running);
                Ok(task)
            })
            .collect()
    }

    fn record_activation(&self, version: GovernanceVersion, label: &str) -> vigil_core::Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO activations (version, label, activated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(version) DO UPDATE SET label = excluded.label, activated_at = excluded.activated_at",
            params![version.0 as i64, label, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        info!(%version, label, "governance activation recorded");
        Ok(())
    }

    fn last_activation(&self) -> vigil_core::Result<Option<GovernanceVersion>> {
        let db = self.db.lock();
        let version: Option<i64> = db
            .query_row("SELECT MAX(version) FROM activations", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(version.map(|v| GovernanceVersion(v as u64)))
    }
}

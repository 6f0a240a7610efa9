//! SQLite-backed store for tasks, worker states and the status-event log
//!
//! The claim protocol runs inside an immediate (write-locking) transaction
//! with a status-guarded UPDATE, so two claimants can never take the same
//! row even when several processes share one database file. Transitions are
//! guarded the same way: zero affected rows is a Conflict, never a silent
//! no-op.

use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    failed_reason_or_default, status_change_message, worker_status, Detection, StatusEvent, Task,
    TaskStatus, TechnicalMetadata, WorkerState, STATUS_CHANGE_ACTION,
};
use crate::error::StoreError;

const TASK_COLUMNS: &str = "id, uploader_id, status, remote_path, assigned_worker, \
     initial_metadata, technical_metadata, lat, lng, altitude, has_trash, confidence, \
     failure_reason, created_at, updated_at";

/// Thresholds driving one reaper sweep
#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    /// Idle time after which a claim (or an unclaimed Queued row) is stale
    pub stale_after: Duration,
    /// Idle time after which a never-uploaded Pending row is terminal-failed
    pub pending_timeout: Duration,
}

/// One task the sweep acted on, with the event detail it recorded
#[derive(Debug, Clone)]
pub struct SweepAction {
    pub task_id: Uuid,
    pub uploader_id: String,
    pub detail: String,
}

/// Everything a sweep changed, reported after the transaction commits
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Queued rows sitting unclaimed past the stale threshold (wake nudge)
    pub stale_queued: usize,
    /// Pending rows terminal-failed by the never-uploaded timeout
    pub timed_out: Vec<SweepAction>,
    /// Orphaned claims demoted back to Queued
    pub recovered: Vec<SweepAction>,
}

impl SweepOutcome {
    pub fn is_empty(&self) -> bool {
        self.stale_queued == 0 && self.timed_out.is_empty() && self.recovered.is_empty()
    }
}

/// Durable pipeline state store
pub struct Store {
    conn: Connection,
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width so string comparison in SQL matches time order
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get(0)?;
    let status: String = row.get(2)?;
    let initial_metadata: Option<String> = row.get(5)?;
    let technical_metadata: Option<String> = row.get(6)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;

    Ok(Task {
        id: Uuid::parse_str(&id).map_err(conversion_err)?,
        uploader_id: row.get(1)?,
        status: TaskStatus::parse(&status).ok_or_else(|| {
            conversion_err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown task status {:?}", status),
            ))
        })?,
        remote_path: row.get(3)?,
        assigned_worker: row.get(4)?,
        initial_metadata: initial_metadata
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(conversion_err)?,
        technical_metadata: technical_metadata
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(conversion_err)?,
        lat: row.get(7)?,
        lng: row.get(8)?,
        altitude: row.get(9)?,
        has_trash: row.get::<_, i64>(10)? != 0,
        confidence: row.get(11)?,
        failure_reason: row.get(12)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(conversion_err)?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(conversion_err)?
            .with_timezone(&Utc),
    })
}

fn worker_from_row(row: &Row<'_>) -> rusqlite::Result<WorkerState> {
    let last_reset: String = row.get(3)?;
    let last_ping: Option<String> = row.get(4)?;
    Ok(WorkerState {
        name: row.get(0)?,
        status: row.get(1)?,
        tasks_processed_today: row.get(2)?,
        last_reset_date: last_reset.parse::<NaiveDate>().map_err(conversion_err)?,
        last_ping: last_ping
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .map_err(conversion_err)?,
    })
}

impl Store {
    /// Open (and migrate) the store under the given directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            StoreError::InvalidValue(format!("cannot create store dir {}: {}", dir.display(), e))
        })?;
        let conn = Connection::open(dir.join("mediastore.db"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.migrate()?;
        debug!(path = %dir.display(), "Opened mediastore");
        Ok(store)
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS media_tasks (
                id TEXT PRIMARY KEY,
                uploader_id TEXT NOT NULL,
                status TEXT NOT NULL,
                remote_path TEXT,
                assigned_worker TEXT,
                initial_metadata TEXT,
                technical_metadata TEXT,
                lat REAL,
                lng REAL,
                altitude REAL,
                has_trash INTEGER NOT NULL DEFAULT 0,
                confidence REAL NOT NULL DEFAULT 0.0,
                failure_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ix_media_tasks_status ON media_tasks(status);
            CREATE INDEX IF NOT EXISTS ix_media_tasks_worker ON media_tasks(assigned_worker);

            CREATE TABLE IF NOT EXISTS worker_states (
                name TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'Offline',
                tasks_processed_today INTEGER NOT NULL DEFAULT 0,
                last_reset_date TEXT NOT NULL,
                last_ping TEXT
            );

            CREATE TABLE IF NOT EXISTS status_events (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES media_tasks(id),
                worker_name TEXT,
                action TEXT NOT NULL,
                message TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ix_status_events_task
                ON status_events(task_id, timestamp);

            CREATE TABLE IF NOT EXISTS detections (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES media_tasks(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                confidence REAL NOT NULL,
                bbox TEXT NOT NULL,
                area_sqm REAL,
                is_manual INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS ix_detections_task ON detections(task_id);",
        )?;
        Ok(())
    }

    // === Task operations ===

    /// Create a new Pending task and its first status event
    pub fn create_task(
        &mut self,
        uploader_id: &str,
        initial_metadata: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let task = Task::new(uploader_id, initial_metadata, now);
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO media_tasks (id, uploader_id, status, initial_metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                task.id.to_string(),
                task.uploader_id,
                task.status.as_str(),
                task.initial_metadata
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                fmt_ts(now),
            ],
        )?;
        append_event_tx(&tx, task.id, None, TaskStatus::Pending, None, now)?;
        tx.commit()?;
        debug!(task_id = %task.id, uploader = %task.uploader_id, "Created pending task");
        Ok(task)
    }

    /// Transition Pending -> Queued once the artifact is in remote storage
    pub fn mark_uploaded(
        &mut self,
        task_id: Uuid,
        remote_path: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE media_tasks SET status = ?1, remote_path = ?2, updated_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                TaskStatus::Queued.as_str(),
                remote_path,
                fmt_ts(now),
                task_id.to_string(),
                TaskStatus::Pending.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "task {} is not PENDING, cannot mark uploaded",
                task_id
            )));
        }
        append_event_tx(&tx, task_id, None, TaskStatus::Queued, None, now)?;
        tx.commit()?;
        Ok(())
    }

    /// Atomically claim the oldest unassigned Queued task for `worker`
    ///
    /// Returns None when no task qualifies or another claimant won the race.
    pub fn claim_next(
        &mut self,
        worker: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate = tx
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM media_tasks
                     WHERE status = ?1 AND assigned_worker IS NULL
                     ORDER BY created_at ASC LIMIT 1"
                ),
                params![TaskStatus::Queued.as_str()],
                task_from_row,
            )
            .optional()?;

        let Some(mut task) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        // The guard re-checks status and assignment so a racing claimant
        // from another process gets zero rows, not a shared claim.
        let changed = tx.execute(
            "UPDATE media_tasks SET status = ?1, assigned_worker = ?2, updated_at = ?3
             WHERE id = ?4 AND status = ?5 AND assigned_worker IS NULL",
            params![
                TaskStatus::Extracting.as_str(),
                worker,
                fmt_ts(now),
                task.id.to_string(),
                TaskStatus::Queued.as_str(),
            ],
        )?;
        if changed == 0 {
            tx.commit()?;
            return Ok(None);
        }

        append_event_tx(&tx, task.id, Some(worker), TaskStatus::Extracting, None, now)?;
        tx.commit()?;

        task.status = TaskStatus::Extracting;
        task.assigned_worker = Some(worker.to_string());
        task.updated_at = now;
        debug!(task_id = %task.id, %worker, "Claimed task");
        Ok(Some(task))
    }

    /// Transition a task forward, guarded on the expected current status
    ///
    /// Advancing into Ready (or any non-claimed status) clears the worker
    /// assignment. Zero affected rows means the task moved underneath the
    /// caller and the current iteration must abort.
    pub fn advance(
        &mut self,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        worker: Option<&str>,
        detail: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::Conflict(format!(
                "illegal transition {} -> {} for task {}",
                from, to, task_id
            )));
        }

        let tx = self.conn.transaction()?;
        let changed = if to.is_claimed() {
            tx.execute(
                "UPDATE media_tasks SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), fmt_ts(now), task_id.to_string(), from.as_str()],
            )?
        } else {
            tx.execute(
                "UPDATE media_tasks SET status = ?1, assigned_worker = NULL, updated_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), fmt_ts(now), task_id.to_string(), from.as_str()],
            )?
        };
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "task {} is no longer {}, cannot advance to {}",
                task_id, from, to
            )));
        }
        append_event_tx(&tx, task_id, worker, to, detail, now)?;
        tx.commit()?;
        Ok(())
    }

    /// Terminal-fail a task, recording a reason and clearing the claim
    pub fn mark_failed(
        &mut self,
        task_id: Uuid,
        reason: Option<&str>,
        worker: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let reason = failed_reason_or_default(reason);
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE media_tasks
             SET status = ?1, failure_reason = ?2, assigned_worker = NULL, updated_at = ?3
             WHERE id = ?4 AND status NOT IN (?5, ?6)",
            params![
                TaskStatus::Failed.as_str(),
                reason,
                fmt_ts(now),
                task_id.to_string(),
                TaskStatus::Ready.as_str(),
                TaskStatus::Failed.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "task {} is already terminal, cannot fail",
                task_id
            )));
        }
        append_event_tx(&tx, task_id, worker, TaskStatus::Failed, Some(&reason), now)?;
        tx.commit()?;
        Ok(())
    }

    /// Release a live claim back to Queued (rate-limit release path)
    pub fn requeue(
        &mut self,
        task_id: Uuid,
        from: TaskStatus,
        worker: &str,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !from.is_claimed() {
            return Err(StoreError::Conflict(format!(
                "cannot requeue task {} from {}",
                task_id, from
            )));
        }
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE media_tasks SET status = ?1, assigned_worker = NULL, updated_at = ?2
             WHERE id = ?3 AND status = ?4 AND assigned_worker = ?5",
            params![
                TaskStatus::Queued.as_str(),
                fmt_ts(now),
                task_id.to_string(),
                from.as_str(),
                worker,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "task {} no longer held by {} in {}",
                task_id, worker, from
            )));
        }
        append_event_tx(&tx, task_id, Some(worker), TaskStatus::Queued, Some(detail), now)?;
        tx.commit()?;
        Ok(())
    }

    /// Persist extracted technical metadata onto the task
    ///
    /// Guarded on `worker` still holding the claim in Extracting, so a
    /// worker whose claim was reaped cannot clobber the new owner's data.
    pub fn set_technical_metadata(
        &mut self,
        task_id: Uuid,
        meta: &TechnicalMetadata,
        worker: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let (lat, lng, altitude) = match meta.gps {
            Some(gps) => (Some(gps.lat), Some(gps.lng), Some(gps.altitude)),
            None => (None, None, None),
        };
        let changed = self.conn.execute(
            "UPDATE media_tasks
             SET technical_metadata = ?1, lat = ?2, lng = ?3, altitude = ?4, updated_at = ?5
             WHERE id = ?6 AND status = ?7 AND assigned_worker = ?8",
            params![
                serde_json::to_string(meta)?,
                lat,
                lng,
                altitude,
                fmt_ts(now),
                task_id.to_string(),
                TaskStatus::Extracting.as_str(),
                worker,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "task {} no longer held by {} in {}",
                task_id,
                worker,
                TaskStatus::Extracting
            )));
        }
        Ok(())
    }

    /// Replace a task's detections and rollups in one transaction
    ///
    /// Guarded on `worker` still holding the claim in Processing; on a
    /// lost claim the whole transaction rolls back, detections included.
    pub fn replace_detections(
        &mut self,
        task_id: Uuid,
        detections: &[Detection],
        has_trash: bool,
        confidence: f64,
        worker: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE media_tasks SET has_trash = ?1, confidence = ?2, updated_at = ?3
             WHERE id = ?4 AND status = ?5 AND assigned_worker = ?6",
            params![
                has_trash as i64,
                confidence,
                fmt_ts(now),
                task_id.to_string(),
                TaskStatus::Processing.as_str(),
                worker,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "task {} no longer held by {} in {}",
                task_id,
                worker,
                TaskStatus::Processing
            )));
        }
        tx.execute(
            "DELETE FROM detections WHERE task_id = ?1 AND is_manual = 0",
            params![task_id.to_string()],
        )?;
        for d in detections {
            tx.execute(
                "INSERT INTO detections (id, task_id, label, confidence, bbox, area_sqm, is_manual)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    d.id.to_string(),
                    task_id.to_string(),
                    d.label,
                    d.confidence,
                    serde_json::to_string(&d.bbox)?,
                    d.area_sqm,
                    d.is_manual as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Get a task by id
    pub fn get_task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM media_tasks WHERE id = ?1"),
                params![task_id.to_string()],
                task_from_row,
            )
            .optional()?)
    }

    /// List tasks in a given status, oldest first
    pub fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM media_tasks WHERE status = ?1 ORDER BY created_at ASC"
        ))?;
        let tasks = stmt
            .query_map(params![status.as_str()], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Tasks in any of the given statuses not touched since `older_than`
    ///
    /// Reaper use only; the sweep runs the same query inside its own
    /// transaction.
    pub fn find_stale(
        &self,
        statuses: &[TaskStatus],
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError> {
        stale_tasks(&self.conn, statuses, older_than)
    }

    /// Count of Queued tasks waiting for a claim
    pub fn queue_depth(&self) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM media_tasks WHERE status = ?1",
            params![TaskStatus::Queued.as_str()],
            |row| row.get(0),
        )?)
    }

    // === Status event log ===

    /// All events for a task in transition order
    pub fn events_for(&self, task_id: Uuid) -> Result<Vec<StatusEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, worker_name, action, message, timestamp
             FROM status_events WHERE task_id = ?1
             ORDER BY timestamp ASC, rowid ASC",
        )?;
        let events = stmt
            .query_map(params![task_id.to_string()], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    // === Worker state operations ===

    /// Seed the fleet rows, keeping any existing counters intact
    pub fn seed_fleet(&mut self, names: &[String], now: DateTime<Utc>) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        for name in names {
            tx.execute(
                "INSERT OR IGNORE INTO worker_states
                 (name, status, tasks_processed_today, last_reset_date, last_ping)
                 VALUES (?1, ?2, 0, ?3, ?4)",
                params![
                    name,
                    worker_status::ACTIVE,
                    now.date_naive().to_string(),
                    fmt_ts(now),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Record a loop-iteration heartbeat
    ///
    /// Sets Active unless Working, and performs the lazy daily-counter
    /// rollover so an idle worker's counter does not show yesterday's
    /// total all morning.
    pub fn heartbeat(&mut self, name: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE worker_states SET tasks_processed_today = 0, last_reset_date = ?1
             WHERE name = ?2 AND last_reset_date <> ?1",
            params![now.date_naive().to_string(), name],
        )?;
        let changed = tx.execute(
            "UPDATE worker_states
             SET last_ping = ?1,
                 status = CASE WHEN status = ?2 THEN status ELSE ?3 END
             WHERE name = ?4",
            params![fmt_ts(now), worker_status::WORKING, worker_status::ACTIVE, name],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("worker {}", name)));
        }
        tx.commit()?;
        Ok(())
    }

    /// Set a worker's activity label
    pub fn set_worker_status(&mut self, name: &str, status: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE worker_states SET status = ?1 WHERE name = ?2",
            params![status, name],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("worker {}", name)));
        }
        Ok(())
    }

    /// Increment the daily counter, rolling it over first if the stored
    /// reset date is not `today`
    pub fn record_task_processed(&mut self, name: &str, today: NaiveDate) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE worker_states SET tasks_processed_today = 0, last_reset_date = ?1
             WHERE name = ?2 AND last_reset_date <> ?1",
            params![today.to_string(), name],
        )?;
        let changed = tx.execute(
            "UPDATE worker_states
             SET tasks_processed_today = tasks_processed_today + 1
             WHERE name = ?1",
            params![name],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("worker {}", name)));
        }
        tx.commit()?;
        Ok(())
    }

    /// Names of workers whose last ping is missing or older than the cutoff
    pub fn list_stale_workers(&self, older_than: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        stale_worker_names(&self.conn, older_than)
    }

    /// All worker rows, by name
    pub fn list_workers(&self) -> Result<Vec<WorkerState>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, status, tasks_processed_today, last_reset_date, last_ping
             FROM worker_states ORDER BY name ASC",
        )?;
        let workers = stmt
            .query_map([], worker_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(workers)
    }

    // === Reaper sweep ===

    /// Run one recovery sweep inside a single transaction
    ///
    /// On any error the whole sweep rolls back; a partially-applied sweep
    /// is never persisted. Running the sweep twice on an unchanged store
    /// finds nothing the second time.
    pub fn reaper_sweep(
        &mut self,
        policy: &SweepPolicy,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, StoreError> {
        let stale_cutoff = now - policy.stale_after;
        let pending_cutoff = now - policy.pending_timeout;
        let mut outcome = SweepOutcome::default();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        // 1. Queued rows nobody has claimed for too long: counted so the
        //    caller can nudge the wake signal after commit.
        outcome.stale_queued = tx.query_row(
            "SELECT COUNT(*) FROM media_tasks
             WHERE status = ?1 AND assigned_worker IS NULL AND updated_at <= ?2",
            params![TaskStatus::Queued.as_str(), fmt_ts(stale_cutoff)],
            |row| row.get::<_, i64>(0),
        )? as usize;

        // 2. Pending rows that never made it into remote storage.
        for task in stale_tasks(&tx, &[TaskStatus::Pending], pending_cutoff)? {
            let detail = build_pending_timeout_detail(&tx, task.id)?;
            append_event_tx(&tx, task.id, None, TaskStatus::Failed, Some(&detail), now)?;
            tx.execute(
                "UPDATE media_tasks
                 SET status = ?1, failure_reason = ?2, assigned_worker = NULL, updated_at = ?3
                 WHERE id = ?4",
                params![
                    TaskStatus::Failed.as_str(),
                    detail,
                    fmt_ts(now),
                    task.id.to_string(),
                ],
            )?;
            outcome.timed_out.push(SweepAction {
                task_id: task.id,
                uploader_id: task.uploader_id,
                detail,
            });
        }

        // 3 + 4. Dead workers and the claims they abandoned mid-flight.
        let stale_workers = stale_worker_names(&tx, stale_cutoff)?;

        if !stale_workers.is_empty() {
            let placeholders = (3..stale_workers.len() + 3)
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT id, uploader_id FROM media_tasks
                 WHERE status IN (?1, ?2) AND assigned_worker IN ({placeholders})"
            );
            let zombies: Vec<(Uuid, String)> = {
                let mut stmt = tx.prepare(&sql)?;
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![
                    Box::new(TaskStatus::Extracting.as_str()),
                    Box::new(TaskStatus::Processing.as_str()),
                ];
                for name in &stale_workers {
                    params_vec.push(Box::new(name.clone()));
                }
                let rows = stmt
                    .query_map(
                        rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
                        |row| {
                            let id: String = row.get(0)?;
                            let uploader: String = row.get(1)?;
                            Ok((id, uploader))
                        },
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter()
                    .map(|(id, uploader)| {
                        Uuid::parse_str(&id)
                            .map(|id| (id, uploader))
                            .map_err(|e| StoreError::InvalidValue(e.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()?
            };

            for (task_id, uploader_id) in zombies {
                let detail = "reaper recovery".to_string();
                append_event_tx(&tx, task_id, None, TaskStatus::Queued, Some(&detail), now)?;
                tx.execute(
                    "UPDATE media_tasks
                     SET status = ?1, assigned_worker = NULL, updated_at = ?2
                     WHERE id = ?3",
                    params![TaskStatus::Queued.as_str(), fmt_ts(now), task_id.to_string()],
                )?;
                outcome.recovered.push(SweepAction {
                    task_id,
                    uploader_id,
                    detail,
                });
            }
        }

        tx.commit()?;
        Ok(outcome)
    }
}

fn stale_tasks(
    conn: &Connection,
    statuses: &[TaskStatus],
    older_than: DateTime<Utc>,
) -> Result<Vec<Task>, StoreError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (2..statuses.len() + 2)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM media_tasks
         WHERE updated_at <= ?1 AND status IN ({placeholders})
         ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(fmt_ts(older_than))];
    for s in statuses {
        params_vec.push(Box::new(s.as_str()));
    }
    let tasks = stmt
        .query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            task_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

fn stale_worker_names(
    conn: &Connection,
    older_than: DateTime<Utc>,
) -> Result<Vec<String>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT name FROM worker_states WHERE last_ping IS NULL OR last_ping <= ?1")?;
    let names = stmt
        .query_map(params![fmt_ts(older_than)], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<StatusEvent> {
    let id: String = row.get(0)?;
    let task_id: String = row.get(1)?;
    let timestamp: String = row.get(5)?;
    Ok(StatusEvent {
        id: Uuid::parse_str(&id).map_err(conversion_err)?,
        task_id: Uuid::parse_str(&task_id).map_err(conversion_err)?,
        worker_name: row.get(2)?,
        action: row.get(3)?,
        message: row.get(4)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(conversion_err)?
            .with_timezone(&Utc),
    })
}

fn append_event_tx(
    tx: &Transaction<'_>,
    task_id: Uuid,
    worker: Option<&str>,
    status: TaskStatus,
    detail: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO status_events (id, task_id, worker_name, action, message, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::now_v7().to_string(),
            task_id.to_string(),
            worker,
            STATUS_CHANGE_ACTION,
            status_change_message(status, detail),
            fmt_ts(now),
        ],
    )?;
    Ok(())
}

/// Infer where a never-uploaded task got stuck from its last event
fn build_pending_timeout_detail(tx: &Transaction<'_>, task_id: Uuid) -> Result<String, StoreError> {
    let latest: Option<String> = tx
        .query_row(
            "SELECT message FROM status_events WHERE task_id = ?1
             ORDER BY timestamp DESC, rowid DESC LIMIT 1",
            params![task_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    let Some(latest) = latest else {
        return Ok("reaper pending timeout: failed during remote upload transfer".to_string());
    };

    let normalized = latest.to_uppercase();
    let inferred_step = if normalized.contains("QUEUED") {
        "during status persistence after upload"
    } else if normalized.contains("PENDING") {
        "during upload transfer"
    } else if normalized.contains("FAILED") {
        "while recovering from previous failure"
    } else {
        "at unknown pipeline step"
    };

    Ok(format!(
        "reaper pending timeout: failed {} (last log: {})",
        inferred_step, latest
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 30, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn queued_task(store: &mut Store, now: DateTime<Utc>) -> Task {
        let task = store.create_task("user-1", None, now).unwrap();
        store
            .mark_uploaded(task.id, "media/user-1/2026-08-30/x.jpg", now)
            .unwrap();
        store.get_task(task.id).unwrap().unwrap()
    }

    #[test]
    fn test_create_and_get_task() {
        let mut store = Store::open_in_memory().unwrap();
        let task = store
            .create_task("user-1", Some(serde_json::json!({"filename": "a.jpg", "size": 42})), ts(0))
            .unwrap();

        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.uploader_id, "user-1");
        assert_eq!(loaded.initial_metadata.unwrap()["filename"], "a.jpg");

        let events = store.events_for(task.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Status changed to PENDING");
    }

    #[test]
    fn test_mark_uploaded_guarded() {
        let mut store = Store::open_in_memory().unwrap();
        let task = store.create_task("user-1", None, ts(0)).unwrap();

        store.mark_uploaded(task.id, "media/p", ts(1)).unwrap();
        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Queued);
        assert_eq!(loaded.remote_path.as_deref(), Some("media/p"));

        // Second call must conflict, not silently no-op
        let err = store.mark_uploaded(task.id, "media/p", ts(2)).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_claim_next_oldest_first() {
        let mut store = Store::open_in_memory().unwrap();
        let first = queued_task(&mut store, ts(0));
        let _second = queued_task(&mut store, ts(1));

        let claimed = store.claim_next("Helios", ts(2)).unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, TaskStatus::Extracting);
        assert_eq!(claimed.assigned_worker.as_deref(), Some("Helios"));
    }

    #[test]
    fn test_claim_mutual_exclusion() {
        let mut store = Store::open_in_memory().unwrap();
        let _task = queued_task(&mut store, ts(0));

        let a = store.claim_next("Helios", ts(1)).unwrap();
        let b = store.claim_next("Eos", ts(1)).unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
    }

    #[test]
    fn test_claim_empty_queue() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(store.claim_next("Helios", ts(0)).unwrap().is_none());
    }

    #[test]
    fn test_advance_happy_path_clears_worker_on_ready() {
        let mut store = Store::open_in_memory().unwrap();
        let task = queued_task(&mut store, ts(0));
        store.claim_next("Helios", ts(1)).unwrap().unwrap();

        store
            .advance(task.id, TaskStatus::Extracting, TaskStatus::Processing, Some("Helios"), None, ts(2))
            .unwrap();
        let mid = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(mid.assigned_worker.as_deref(), Some("Helios"));

        store
            .advance(task.id, TaskStatus::Processing, TaskStatus::Ready, Some("Helios"), None, ts(3))
            .unwrap();
        let done = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Ready);
        assert!(done.assigned_worker.is_none());
    }

    #[test]
    fn test_advance_conflict_on_wrong_status() {
        let mut store = Store::open_in_memory().unwrap();
        let task = queued_task(&mut store, ts(0));

        // Task is Queued, not Extracting
        let err = store
            .advance(task.id, TaskStatus::Extracting, TaskStatus::Processing, None, None, ts(1))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_advance_rejects_illegal_transition() {
        let mut store = Store::open_in_memory().unwrap();
        let task = queued_task(&mut store, ts(0));
        let err = store
            .advance(task.id, TaskStatus::Queued, TaskStatus::Ready, None, None, ts(1))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_mark_failed_terminal() {
        let mut store = Store::open_in_memory().unwrap();
        let task = queued_task(&mut store, ts(0));
        store.claim_next("Helios", ts(1)).unwrap().unwrap();

        store
            .mark_failed(task.id, Some("download error"), Some("Helios"), ts(2))
            .unwrap();
        let failed = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("download error"));
        assert!(failed.assigned_worker.is_none());

        // Terminal stays terminal
        assert!(store.mark_failed(task.id, None, None, ts(3)).unwrap_err().is_conflict());
    }

    #[test]
    fn test_mark_failed_blank_reason_gets_default() {
        let mut store = Store::open_in_memory().unwrap();
        let task = queued_task(&mut store, ts(0));
        store.claim_next("Helios", ts(1)).unwrap().unwrap();
        store.mark_failed(task.id, Some("  "), Some("Helios"), ts(2)).unwrap();
        let failed = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some(crate::DEFAULT_FAILED_REASON));
    }

    #[test]
    fn test_requeue_releases_claim() {
        let mut store = Store::open_in_memory().unwrap();
        let task = queued_task(&mut store, ts(0));
        store.claim_next("Helios", ts(1)).unwrap().unwrap();

        store
            .requeue(task.id, TaskStatus::Extracting, "Helios", "rate limited, requeued", ts(2))
            .unwrap();
        let released = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(released.status, TaskStatus::Queued);
        assert!(released.assigned_worker.is_none());

        // A different worker can pick it up again
        let reclaimed = store.claim_next("Eos", ts(3)).unwrap().unwrap();
        assert_eq!(reclaimed.id, task.id);
    }

    #[test]
    fn test_technical_metadata_and_gps_columns() {
        let mut store = Store::open_in_memory().unwrap();
        let task = queued_task(&mut store, ts(0));
        store.claim_next("Helios", ts(1)).unwrap().unwrap();
        let meta = TechnicalMetadata {
            make: Some("Canon".to_string()),
            model: Some("EOS R5".to_string()),
            software: None,
            date_taken: Some("2026:08:29 14:12:00".to_string()),
            gps: Some(crate::GpsPoint { lat: 52.1, lng: 21.0, altitude: 110.0 }),
        };
        store.set_technical_metadata(task.id, &meta, "Helios", ts(2)).unwrap();

        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.lat, Some(52.1));
        assert_eq!(loaded.lng, Some(21.0));
        assert_eq!(loaded.technical_metadata.unwrap().make.as_deref(), Some("Canon"));
    }

    #[test]
    fn test_metadata_write_requires_live_claim() {
        let mut store = Store::open_in_memory().unwrap();
        let task = queued_task(&mut store, ts(0));
        store.claim_next("Helios", ts(1)).unwrap().unwrap();

        // Helios loses the claim and Eos takes over.
        store.requeue(task.id, TaskStatus::Extracting, "Helios", "r", ts(2)).unwrap();
        store.claim_next("Eos", ts(3)).unwrap().unwrap();

        let meta = TechnicalMetadata {
            make: Some("Canon".to_string()),
            ..TechnicalMetadata::default()
        };
        let err = store
            .set_technical_metadata(task.id, &meta, "Helios", ts(4))
            .unwrap_err();
        assert!(err.is_conflict());
        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert!(loaded.technical_metadata.is_none());
        assert_eq!(loaded.assigned_worker.as_deref(), Some("Eos"));
    }

    fn processing_task(store: &mut Store, worker: &str) -> Task {
        let task = queued_task(store, ts(0));
        store.claim_next(worker, ts(1)).unwrap().unwrap();
        store
            .advance(task.id, TaskStatus::Extracting, TaskStatus::Processing, Some(worker), None, ts(2))
            .unwrap();
        store.get_task(task.id).unwrap().unwrap()
    }

    #[test]
    fn test_replace_detections_and_rollups() {
        let mut store = Store::open_in_memory().unwrap();
        let task = processing_task(&mut store, "Helios");
        let bbox = crate::BoundingBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 };
        let detections = vec![
            Detection::new("plastic", 0.9, bbox, Some(0.4)),
            Detection::new("metal", 0.6, bbox, None),
        ];
        let r = crate::rollups(&detections);
        store
            .replace_detections(task.id, &detections, r.has_trash, r.confidence, "Helios", ts(3))
            .unwrap();

        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert!(loaded.has_trash);
        assert_eq!(loaded.confidence, 90.0);
    }

    #[test]
    fn test_detection_write_requires_live_claim() {
        let mut store = Store::open_in_memory().unwrap();
        let task = processing_task(&mut store, "Helios");

        // The claim moves to Eos while Helios is still mid-stage.
        store.requeue(task.id, TaskStatus::Processing, "Helios", "r", ts(3)).unwrap();
        store.claim_next("Eos", ts(4)).unwrap().unwrap();

        let bbox = crate::BoundingBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 };
        let detections = vec![Detection::new("plastic", 0.9, bbox, None)];
        let err = store
            .replace_detections(task.id, &detections, true, 90.0, "Helios", ts(5))
            .unwrap_err();
        assert!(err.is_conflict());

        // The rollback covers the detection rows too.
        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert!(!loaded.has_trash);
        assert_eq!(loaded.confidence, 0.0);
        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM detections WHERE task_id = ?1",
                params![task.id.to_string()], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_queue_depth() {
        let mut store = Store::open_in_memory().unwrap();
        assert_eq!(store.queue_depth().unwrap(), 0);
        queued_task(&mut store, ts(0));
        queued_task(&mut store, ts(1));
        assert_eq!(store.queue_depth().unwrap(), 2);
        store.claim_next("Helios", ts(2)).unwrap();
        assert_eq!(store.queue_depth().unwrap(), 1);
    }

    #[test]
    fn test_heartbeat_preserves_working() {
        let mut store = Store::open_in_memory().unwrap();
        store.seed_fleet(&["Helios".to_string()], ts(0)).unwrap();

        store.set_worker_status("Helios", worker_status::WORKING).unwrap();
        store.heartbeat("Helios", ts(1)).unwrap();
        let worker = &store.list_workers().unwrap()[0];
        assert_eq!(worker.status, worker_status::WORKING);

        store.set_worker_status("Helios", worker_status::OFFLINE).unwrap();
        store.heartbeat("Helios", ts(2)).unwrap();
        let worker = &store.list_workers().unwrap()[0];
        assert_eq!(worker.status, worker_status::ACTIVE);
    }

    #[test]
    fn test_seed_fleet_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        let names = vec!["Helios".to_string(), "Eos".to_string()];
        store.seed_fleet(&names, ts(0)).unwrap();
        store.record_task_processed("Helios", ts(0).date_naive()).unwrap();

        // Re-seeding must not reset counters
        store.seed_fleet(&names, ts(100)).unwrap();
        let workers = store.list_workers().unwrap();
        let helios = workers.iter().find(|w| w.name == "Helios").unwrap();
        assert_eq!(helios.tasks_processed_today, 1);
        assert_eq!(workers.len(), 2);
    }

    #[test]
    fn test_daily_counter_rollover() {
        let mut store = Store::open_in_memory().unwrap();
        store.seed_fleet(&["Helios".to_string()], ts(0)).unwrap();

        let today = ts(0).date_naive();
        store.record_task_processed("Helios", today).unwrap();
        store.record_task_processed("Helios", today).unwrap();
        assert_eq!(store.list_workers().unwrap()[0].tasks_processed_today, 2);

        let tomorrow = today + chrono::Days::new(1);
        store.record_task_processed("Helios", tomorrow).unwrap();
        let worker = &store.list_workers().unwrap()[0];
        assert_eq!(worker.tasks_processed_today, 1);
        assert_eq!(worker.last_reset_date, tomorrow);
    }

    #[test]
    fn test_heartbeat_rolls_counter_over() {
        let mut store = Store::open_in_memory().unwrap();
        store.seed_fleet(&["Helios".to_string()], ts(0)).unwrap();
        store.record_task_processed("Helios", ts(0).date_naive()).unwrap();

        // An idle heartbeat the next day resets the counter.
        let next_day = ts(0) + Duration::days(1);
        store.heartbeat("Helios", next_day).unwrap();
        let worker = &store.list_workers().unwrap()[0];
        assert_eq!(worker.tasks_processed_today, 0);
        assert_eq!(worker.last_reset_date, next_day.date_naive());
    }

    #[test]
    fn test_find_stale_and_stale_workers() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .seed_fleet(&["Helios".to_string(), "Eos".to_string()], ts(0))
            .unwrap();
        let task = queued_task(&mut store, ts(0));
        store.heartbeat("Eos", ts(700)).unwrap();

        let stale = store.find_stale(&[TaskStatus::Queued], ts(300)).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, task.id);
        assert!(store.find_stale(&[TaskStatus::Pending], ts(300)).unwrap().is_empty());
        assert!(store.find_stale(&[], ts(300)).unwrap().is_empty());

        let stale_workers = store.list_stale_workers(ts(600)).unwrap();
        assert_eq!(stale_workers, vec!["Helios".to_string()]);
    }

    #[test]
    fn test_sweep_pending_timeout() {
        let mut store = Store::open_in_memory().unwrap();
        let task = store.create_task("user-1", None, ts(0)).unwrap();

        let policy = SweepPolicy {
            stale_after: Duration::minutes(10),
            pending_timeout: Duration::minutes(15),
        };
        // Too early: nothing happens
        let outcome = store.reaper_sweep(&policy, ts(60)).unwrap();
        assert!(outcome.timed_out.is_empty());

        let outcome = store.reaper_sweep(&policy, ts(16 * 60)).unwrap();
        assert_eq!(outcome.timed_out.len(), 1);
        assert_eq!(outcome.timed_out[0].task_id, task.id);
        assert!(outcome.timed_out[0].detail.contains("during upload transfer"));

        let failed = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.failure_reason.unwrap().starts_with("reaper pending timeout"));
    }

    #[test]
    fn test_sweep_recovers_orphaned_claim() {
        let mut store = Store::open_in_memory().unwrap();
        store.seed_fleet(&["Helios".to_string()], ts(0)).unwrap();
        let task = queued_task(&mut store, ts(0));
        store.claim_next("Helios", ts(1)).unwrap().unwrap();

        // Helios never pings again; sweep well past the threshold.
        let policy = SweepPolicy {
            stale_after: Duration::minutes(10),
            pending_timeout: Duration::minutes(15),
        };
        let outcome = store.reaper_sweep(&policy, ts(601)).unwrap();
        assert_eq!(outcome.recovered.len(), 1);
        assert_eq!(outcome.recovered[0].detail, "reaper recovery");

        let recovered = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(recovered.status, TaskStatus::Queued);
        assert!(recovered.assigned_worker.is_none());

        let events = store.events_for(task.id).unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.message, "Status changed to QUEUED (reaper recovery)");
    }

    #[test]
    fn test_sweep_leaves_live_claims_alone() {
        let mut store = Store::open_in_memory().unwrap();
        store.seed_fleet(&["Helios".to_string()], ts(0)).unwrap();
        let task = queued_task(&mut store, ts(0));
        store.claim_next("Helios", ts(1)).unwrap().unwrap();
        store.heartbeat("Helios", ts(595)).unwrap();

        let policy = SweepPolicy {
            stale_after: Duration::minutes(10),
            pending_timeout: Duration::minutes(15),
        };
        let outcome = store.reaper_sweep(&policy, ts(601)).unwrap();
        assert!(outcome.recovered.is_empty());
        let unchanged = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(unchanged.status, TaskStatus::Extracting);
        assert_eq!(unchanged.assigned_worker.as_deref(), Some("Helios"));
    }

    #[test]
    fn test_sweep_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        store.seed_fleet(&["Helios".to_string()], ts(0)).unwrap();
        let task = queued_task(&mut store, ts(0));
        store.claim_next("Helios", ts(1)).unwrap().unwrap();

        let policy = SweepPolicy {
            stale_after: Duration::minutes(10),
            pending_timeout: Duration::minutes(15),
        };
        let first = store.reaper_sweep(&policy, ts(601)).unwrap();
        assert_eq!(first.recovered.len(), 1);
        let events_after_first = store.events_for(task.id).unwrap().len();

        // The demotion refreshed updated_at, so the second sweep only sees
        // a (not yet stale) queued row.
        let second = store.reaper_sweep(&policy, ts(602)).unwrap();
        assert!(second.recovered.is_empty());
        assert!(second.timed_out.is_empty());
        assert_eq!(store.events_for(task.id).unwrap().len(), events_after_first);
    }

    #[test]
    fn test_sweep_counts_stale_queued() {
        let mut store = Store::open_in_memory().unwrap();
        queued_task(&mut store, ts(0));

        let policy = SweepPolicy {
            stale_after: Duration::minutes(10),
            pending_timeout: Duration::minutes(15),
        };
        let fresh = store.reaper_sweep(&policy, ts(60)).unwrap();
        assert_eq!(fresh.stale_queued, 0);

        let stale = store.reaper_sweep(&policy, ts(601)).unwrap();
        assert_eq!(stale.stale_queued, 1);
    }

    #[test]
    fn test_sweep_pending_detail_infers_step_from_last_event() {
        let mut store = Store::open_in_memory().unwrap();
        let task = store.create_task("user-1", None, ts(0)).unwrap();
        let policy = SweepPolicy {
            stale_after: Duration::minutes(10),
            pending_timeout: Duration::minutes(15),
        };
        let outcome = store.reaper_sweep(&policy, ts(16 * 60)).unwrap();
        // Last event is the PENDING creation event.
        assert!(outcome.timed_out[0]
            .detail
            .contains("failed during upload transfer (last log: Status changed to PENDING)"));
        assert_eq!(outcome.timed_out[0].task_id, task.id);
    }

    #[test]
    fn test_events_ordering() {
        let mut store = Store::open_in_memory().unwrap();
        let task = queued_task(&mut store, ts(0));
        store.claim_next("Helios", ts(1)).unwrap().unwrap();
        store
            .advance(task.id, TaskStatus::Extracting, TaskStatus::Processing, Some("Helios"), None, ts(2))
            .unwrap();
        store
            .advance(task.id, TaskStatus::Processing, TaskStatus::Ready, Some("Helios"), None, ts(3))
            .unwrap();

        let statuses: Vec<String> = store
            .events_for(task.id)
            .unwrap()
            .iter()
            .map(|e| e.message.clone())
            .collect();
        assert_eq!(
            statuses,
            vec![
                "Status changed to PENDING",
                "Status changed to QUEUED",
                "Status changed to EXTRACTING",
                "Status changed to PROCESSING",
                "Status changed to READY",
            ]
        );
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let task_id;
        {
            let mut store = Store::open(dir.path()).unwrap();
            let task = store.create_task("user-1", None, ts(0)).unwrap();
            task_id = task.id;
        }
        let store = Store::open(dir.path()).unwrap();
        assert!(store.get_task(task_id).unwrap().is_some());
    }
}

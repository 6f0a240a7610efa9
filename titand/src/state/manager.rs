//! StateHandle - actor that owns the Store
//!
//! Processes commands via channels for thread-safe access to persistent
//! state. The rusqlite connection is not Sync, so every component talks to
//! it through this handle instead of sharing it.

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use mediastore::{
    rollups, Detection, StatusEvent, Store, SweepOutcome, SweepPolicy, Task, TaskStatus,
    TechnicalMetadata, WorkerState,
};

use super::messages::{StateCommand, StateError, StateResponse};

/// Handle to send commands to the state actor
#[derive(Clone)]
pub struct StateHandle {
    tx: mpsc::Sender<StateCommand>,
}

impl StateHandle {
    /// Open the store under `dir` and spawn the actor
    pub fn spawn(dir: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(dir = %dir.as_ref().display(), "spawn: called");
        let store = Store::open(dir.as_ref())?;
        Ok(Self::with_store(store))
    }

    /// Spawn the actor over an already-open store
    pub fn with_store(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("State actor spawned");
        Self { tx }
    }

    async fn request<T>(
        &self,
        cmd: StateCommand,
        reply_rx: tokio::sync::oneshot::Receiver<StateResponse<T>>,
    ) -> StateResponse<T> {
        self.tx.send(cmd).await.map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Task operations ===

    /// Create a new Pending task
    pub async fn create_task(
        &self,
        uploader_id: &str,
        initial_metadata: Option<serde_json::Value>,
    ) -> StateResponse<Task> {
        debug!(%uploader_id, "create_task: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::CreateTask {
                uploader_id: uploader_id.to_string(),
                initial_metadata,
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// Record a successful upload, moving the task to Queued
    pub async fn mark_uploaded(&self, task_id: Uuid, remote_path: &str) -> StateResponse<()> {
        debug!(%task_id, %remote_path, "mark_uploaded: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::MarkUploaded {
                task_id,
                remote_path: remote_path.to_string(),
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// Claim the oldest queued task for `worker`, if any
    pub async fn claim_next(&self, worker: &str) -> StateResponse<Option<Task>> {
        debug!(%worker, "claim_next: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::ClaimNext {
                worker: worker.to_string(),
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// Advance a task, guarded on its expected current status
    pub async fn advance(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        worker: Option<&str>,
        detail: Option<&str>,
    ) -> StateResponse<()> {
        debug!(%task_id, %from, %to, "advance: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::Advance {
                task_id,
                from,
                to,
                worker: worker.map(str::to_string),
                detail: detail.map(str::to_string),
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// Terminal-fail a task
    pub async fn mark_failed(
        &self,
        task_id: Uuid,
        reason: Option<&str>,
        worker: Option<&str>,
    ) -> StateResponse<()> {
        debug!(%task_id, ?reason, "mark_failed: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::MarkFailed {
                task_id,
                reason: reason.map(str::to_string),
                worker: worker.map(str::to_string),
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// Release a live claim back to Queued
    pub async fn requeue(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        worker: &str,
        detail: &str,
    ) -> StateResponse<()> {
        debug!(%task_id, %from, %worker, "requeue: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::Requeue {
                task_id,
                from,
                worker: worker.to_string(),
                detail: detail.to_string(),
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// Persist extracted technical metadata, guarded on `worker` still
    /// holding the claim
    pub async fn set_technical_metadata(
        &self,
        task_id: Uuid,
        meta: TechnicalMetadata,
        worker: &str,
    ) -> StateResponse<()> {
        debug!(%task_id, %worker, "set_technical_metadata: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::SetTechnicalMetadata {
                task_id,
                meta: Box::new(meta),
                worker: worker.to_string(),
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// Replace a task's detections, guarded on `worker` still holding the
    /// claim; rollups are recomputed in the same transaction
    pub async fn replace_detections(
        &self,
        task_id: Uuid,
        detections: Vec<Detection>,
        worker: &str,
    ) -> StateResponse<()> {
        debug!(%task_id, %worker, count = detections.len(), "replace_detections: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::ReplaceDetections {
                task_id,
                detections,
                worker: worker.to_string(),
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// Get a task by id
    pub async fn get_task(&self, task_id: Uuid) -> StateResponse<Option<Task>> {
        debug!(%task_id, "get_task: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(StateCommand::GetTask { task_id, reply }, reply_rx).await
    }

    /// List tasks in a given status, oldest first
    pub async fn list_tasks_by_status(&self, status: TaskStatus) -> StateResponse<Vec<Task>> {
        debug!(%status, "list_tasks_by_status: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(StateCommand::ListTasksByStatus { status, reply }, reply_rx)
            .await
    }

    /// Number of queued tasks waiting for a claim
    pub async fn queue_depth(&self) -> StateResponse<i64> {
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(StateCommand::QueueDepth { reply }, reply_rx).await
    }

    /// Status-event history of a task
    pub async fn events_for(&self, task_id: Uuid) -> StateResponse<Vec<StatusEvent>> {
        debug!(%task_id, "events_for: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(StateCommand::EventsFor { task_id, reply }, reply_rx).await
    }

    // === Worker state operations ===

    /// Seed fleet rows for the given names, keeping existing counters
    pub async fn seed_fleet(&self, names: Vec<String>) -> StateResponse<()> {
        debug!(count = names.len(), "seed_fleet: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(StateCommand::SeedFleet { names, reply }, reply_rx).await
    }

    /// Record a worker loop-iteration ping
    pub async fn heartbeat(&self, name: &str) -> StateResponse<()> {
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::Heartbeat {
                name: name.to_string(),
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// Set a worker's activity label
    pub async fn set_worker_status(&self, name: &str, status: &str) -> StateResponse<()> {
        debug!(%name, %status, "set_worker_status: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::SetWorkerStatus {
                name: name.to_string(),
                status: status.to_string(),
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// Bump a worker's daily counter
    pub async fn record_task_processed(&self, name: &str) -> StateResponse<()> {
        debug!(%name, "record_task_processed: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(
            StateCommand::RecordTaskProcessed {
                name: name.to_string(),
                reply,
            },
            reply_rx,
        )
        .await
    }

    /// All worker rows
    pub async fn list_workers(&self) -> StateResponse<Vec<WorkerState>> {
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(StateCommand::ListWorkers { reply }, reply_rx).await
    }

    // === Reaper ===

    /// Run one recovery sweep
    pub async fn reaper_sweep(&self, policy: SweepPolicy) -> StateResponse<SweepOutcome> {
        debug!("reaper_sweep: called");
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        self.request(StateCommand::ReaperSweep { policy, reply }, reply_rx).await
    }
}

/// The actor task that owns the store
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("State actor started");

    while let Some(cmd) = rx.recv().await {
        let now = Utc::now();
        match cmd {
            StateCommand::CreateTask {
                uploader_id,
                initial_metadata,
                reply,
            } => {
                let result = store
                    .create_task(&uploader_id, initial_metadata, now)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::MarkUploaded {
                task_id,
                remote_path,
                reply,
            } => {
                let result = store
                    .mark_uploaded(task_id, &remote_path, now)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::ClaimNext { worker, reply } => {
                let result = store.claim_next(&worker, now).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::Advance {
                task_id,
                from,
                to,
                worker,
                detail,
                reply,
            } => {
                let result = store
                    .advance(task_id, from, to, worker.as_deref(), detail.as_deref(), now)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::MarkFailed {
                task_id,
                reason,
                worker,
                reply,
            } => {
                let result = store
                    .mark_failed(task_id, reason.as_deref(), worker.as_deref(), now)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::Requeue {
                task_id,
                from,
                worker,
                detail,
                reply,
            } => {
                let result = store
                    .requeue(task_id, from, &worker, &detail, now)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::SetTechnicalMetadata {
                task_id,
                meta,
                worker,
                reply,
            } => {
                let result = store
                    .set_technical_metadata(task_id, &meta, &worker, now)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::ReplaceDetections {
                task_id,
                detections,
                worker,
                reply,
            } => {
                let result = replace_detections(&mut store, task_id, &detections, &worker, now);
                let _ = reply.send(result);
            }

            StateCommand::GetTask { task_id, reply } => {
                let result = store.get_task(task_id).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::ListTasksByStatus { status, reply } => {
                let result = store.list_tasks_by_status(status).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::QueueDepth { reply } => {
                let result = store.queue_depth().map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::EventsFor { task_id, reply } => {
                let result = store.events_for(task_id).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::SeedFleet { names, reply } => {
                let result = store.seed_fleet(&names, now).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::Heartbeat { name, reply } => {
                let result = store.heartbeat(&name, now).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::SetWorkerStatus { name, status, reply } => {
                let result = store.set_worker_status(&name, &status).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::RecordTaskProcessed { name, reply } => {
                let result = store
                    .record_task_processed(&name, now.date_naive())
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::ListWorkers { reply } => {
                let result = store.list_workers().map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::ReaperSweep { policy, reply } => {
                let result = store.reaper_sweep(&policy, now).map_err(StateError::from);
                let _ = reply.send(result);
            }
        }
    }

    debug!("State actor stopped");
}

fn replace_detections(
    store: &mut Store,
    task_id: Uuid,
    detections: &[Detection],
    worker: &str,
    now: DateTime<Utc>,
) -> StateResponse<()> {
    let r = rollups(detections);
    store
        .replace_detections(task_id, detections, r.has_trash, r.confidence, worker, now)
        .map_err(StateError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_roundtrip() {
        let state = StateHandle::with_store(Store::open_in_memory().unwrap());
        let task = state.create_task("user-1", None).await.unwrap();

        state.mark_uploaded(task.id, "media/p").await.unwrap();
        let claimed = state.claim_next("Helios").await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.status, TaskStatus::Extracting);

        // Conflict surfaces as StateError::Conflict through the channel
        let err = state
            .advance(task.id, TaskStatus::Processing, TaskStatus::Ready, None, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_handle_replace_detections_computes_rollups() {
        let state = StateHandle::with_store(Store::open_in_memory().unwrap());
        let task = state.create_task("user-1", None).await.unwrap();
        state.mark_uploaded(task.id, "media/p").await.unwrap();
        state.claim_next("Helios").await.unwrap().unwrap();
        state
            .advance(
                task.id,
                TaskStatus::Extracting,
                TaskStatus::Processing,
                Some("Helios"),
                None,
            )
            .await
            .unwrap();

        let bbox = mediastore::BoundingBox { x: 0.1, y: 0.1, w: 0.2, h: 0.2 };
        state
            .replace_detections(task.id, vec![Detection::new("plastic", 0.75, bbox, None)], "Helios")
            .await
            .unwrap();

        let loaded = state.get_task(task.id).await.unwrap().unwrap();
        assert!(loaded.has_trash);
        assert_eq!(loaded.confidence, 75.0);
    }
}

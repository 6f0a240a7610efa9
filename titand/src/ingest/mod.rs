//! Ingest: accept an artifact, upload it, and queue it for the fleet
//!
//! The task row is created Pending before the upload starts, so a crash
//! mid-transfer leaves a Pending row the reaper will eventually time out.
//! A rate-limit answer also leaves the row Pending (and arms the gate);
//! any other upload failure terminal-fails the task immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mediastore::TaskStatus;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fleet::{RateLimitGate, WakeSignal};
use crate::notify::{Notifier, StatusUpdate};
use crate::objstore::{remote_object_path, ObjectStore, ObjectStoreError};
use crate::state::{StateError, StateHandle};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Task was left Pending; the reaper times it out if ingest never
    /// retries
    #[error("remote storage rate limited, task {task_id} left pending")]
    RateLimited { task_id: Uuid, retry_after: Duration },

    #[error("upload failed for task {task_id}: {reason}")]
    Upload { task_id: Uuid, reason: String },

    #[error(transparent)]
    State(#[from] StateError),
}

pub struct Ingestor {
    state: StateHandle,
    objects: Arc<dyn ObjectStore>,
    gate: RateLimitGate,
    wake: WakeSignal,
    notifier: Arc<dyn Notifier>,
}

impl Ingestor {
    pub fn new(
        state: StateHandle,
        objects: Arc<dyn ObjectStore>,
        gate: RateLimitGate,
        wake: WakeSignal,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            state,
            objects,
            gate,
            wake,
            notifier,
        }
    }

    /// Ingest a local file; returns the id of the queued task
    pub async fn ingest_file(&self, uploader_id: &str, path: &Path) -> Result<Uuid, IngestError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        self.ingest_bytes(uploader_id, &filename, bytes).await
    }

    /// Ingest raw bytes under a filename
    pub async fn ingest_bytes(
        &self,
        uploader_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Uuid, IngestError> {
        let initial = serde_json::json!({
            "filename": filename,
            "size": bytes.len(),
        });
        let task = self.state.create_task(uploader_id, Some(initial)).await?;
        self.notifier.notify(StatusUpdate {
            task_id: task.id,
            uploader_id: uploader_id.to_string(),
            status: TaskStatus::Pending,
            detail: None,
        });
        let remote = remote_object_path(uploader_id, Utc::now().date_naive(), task.id, filename);

        match self.objects.put(&remote, bytes).await {
            Ok(()) => {
                self.state.mark_uploaded(task.id, &remote).await?;
                self.notifier.notify(StatusUpdate {
                    task_id: task.id,
                    uploader_id: uploader_id.to_string(),
                    status: TaskStatus::Queued,
                    detail: None,
                });
                self.wake.notify_all();
                info!(task_id = %task.id, %uploader_id, %remote, "Task queued");
                Ok(task.id)
            }
            Err(ObjectStoreError::RateLimited { retry_after }) => {
                self.gate.arm(retry_after);
                warn!(
                    task_id = %task.id,
                    retry_after_secs = retry_after.as_secs(),
                    "Upload rate limited, task left pending"
                );
                Err(IngestError::RateLimited {
                    task_id: task.id,
                    retry_after,
                })
            }
            Err(e) => {
                let reason = format!("upload failed: {}", e);
                self.state.mark_failed(task.id, Some(&reason), None).await?;
                self.notifier.notify(StatusUpdate {
                    task_id: task.id,
                    uploader_id: uploader_id.to_string(),
                    status: TaskStatus::Failed,
                    detail: Some(reason.clone()),
                });
                Err(IngestError::Upload {
                    task_id: task.id,
                    reason,
                })
            }
        }
    }
}

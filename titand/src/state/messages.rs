//! State actor messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use mediastore::{
    Detection, StatusEvent, StoreError, SweepOutcome, SweepPolicy, Task, TaskStatus,
    TechnicalMetadata, WorkerState,
};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The row moved underneath the caller; abandon the current iteration
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Channel error")]
    ChannelError,
}

impl StateError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<StoreError> for StateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Store(other.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the state actor
#[derive(Debug)]
pub enum StateCommand {
    // Task operations
    CreateTask {
        uploader_id: String,
        initial_metadata: Option<serde_json::Value>,
        reply: oneshot::Sender<StateResponse<Task>>,
    },
    MarkUploaded {
        task_id: Uuid,
        remote_path: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ClaimNext {
        worker: String,
        reply: oneshot::Sender<StateResponse<Option<Task>>>,
    },
    Advance {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        worker: Option<String>,
        detail: Option<String>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    MarkFailed {
        task_id: Uuid,
        reason: Option<String>,
        worker: Option<String>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Requeue {
        task_id: Uuid,
        from: TaskStatus,
        worker: String,
        detail: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    SetTechnicalMetadata {
        task_id: Uuid,
        meta: Box<TechnicalMetadata>,
        worker: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ReplaceDetections {
        task_id: Uuid,
        detections: Vec<Detection>,
        worker: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetTask {
        task_id: Uuid,
        reply: oneshot::Sender<StateResponse<Option<Task>>>,
    },
    ListTasksByStatus {
        status: TaskStatus,
        reply: oneshot::Sender<StateResponse<Vec<Task>>>,
    },
    QueueDepth {
        reply: oneshot::Sender<StateResponse<i64>>,
    },
    EventsFor {
        task_id: Uuid,
        reply: oneshot::Sender<StateResponse<Vec<StatusEvent>>>,
    },

    // Worker state operations
    SeedFleet {
        names: Vec<String>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Heartbeat {
        name: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    SetWorkerStatus {
        name: String,
        status: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    RecordTaskProcessed {
        name: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListWorkers {
        reply: oneshot::Sender<StateResponse<Vec<WorkerState>>>,
    },

    // Reaper
    ReaperSweep {
        policy: SweepPolicy,
        reply: oneshot::Sender<StateResponse<SweepOutcome>>,
    },
}

//! Domain types stored by the mediastore

mod detection;
mod event;
mod task;
mod worker;

pub use detection::{rollups, BoundingBox, Detection, Rollups};
pub use event::{
    failed_reason_or_default, status_change_message, StatusEvent, DEFAULT_FAILED_REASON,
    STATUS_CHANGE_ACTION,
};
pub use task::{GpsPoint, Task, TaskStatus, TechnicalMetadata};
pub use worker::{worker_status, WorkerState};

//! mediastore - durable state for the titand media pipeline
//!
//! One SQLite database holds four tables: media tasks, worker states, the
//! append-only status-event log, and detections. The store is the single
//! source of truth for claim state; the in-process worker loops hold no
//! authoritative state beyond "which task am I currently holding".
//!
//! Every staleness-sensitive operation takes an explicit `now` so callers
//! (and tests) control the clock.

pub mod domain;
pub mod error;
pub mod store;

pub use domain::{
    failed_reason_or_default, rollups, status_change_message, worker_status, BoundingBox,
    Detection, GpsPoint, Rollups, StatusEvent, Task, TaskStatus, TechnicalMetadata, WorkerState,
    DEFAULT_FAILED_REASON,
};
pub use error::StoreError;
pub use store::{Store, SweepAction, SweepOutcome, SweepPolicy};

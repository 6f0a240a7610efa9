//! Task domain type and the pipeline status machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Pipeline status of a media task
///
/// Statuses only move forward along the pipeline, or sideways into Failed.
/// The two backward edges (Extracting/Processing back to Queued) belong to
/// recovery paths: the reaper demoting an orphaned claim, or a worker
/// releasing a claim after a rate-limit signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Row exists but the artifact has not yet landed in remote storage
    #[default]
    Pending,
    /// Uploaded and waiting for a worker claim
    Queued,
    /// Claimed; metadata extraction in progress
    Extracting,
    /// Detection pass in progress
    Processing,
    /// Pipeline complete
    Ready,
    /// Terminal failure, reason recorded
    Failed,
}

impl TaskStatus {
    /// Database / wire form (uppercase)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Extracting => "EXTRACTING",
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the database form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "QUEUED" => Some(Self::Queued),
            "EXTRACTING" => Some(Self::Extracting),
            "PROCESSING" => Some(Self::Processing),
            "READY" => Some(Self::Ready),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    /// Check if a task in this status holds a worker claim
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Extracting | Self::Processing)
    }

    /// Check whether a transition to `next` is legal
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Queued) => true,
            (Self::Queued, Self::Extracting) => true,
            (Self::Extracting, Self::Processing) => true,
            (Self::Processing, Self::Ready) => true,
            // Escape hatch from any non-terminal state
            (s, Self::Failed) if !s.is_terminal() => true,
            // Recovery demotions (reaper / rate-limit release)
            (Self::Extracting, Self::Queued) => true,
            (Self::Processing, Self::Queued) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// GPS fix extracted from EXIF
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub lat: f64,
    pub lng: f64,
    pub altitude: f64,
}

/// Technical metadata derived from the artifact by the extraction stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalMetadata {
    pub make: Option<String>,
    pub model: Option<String>,
    pub software: Option<String>,
    pub date_taken: Option<String>,
    pub gps: Option<GpsPoint>,
}

/// One unit of pipeline work (one uploaded media item)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,

    /// Submitting user, for notification routing
    pub uploader_id: String,

    /// Current pipeline status
    pub status: TaskStatus,

    /// Location of the stored artifact, set once upload succeeds
    pub remote_path: Option<String>,

    /// Name of the worker holding the claim; non-null iff status is
    /// Extracting or Processing
    pub assigned_worker: Option<String>,

    /// Ingest-side metadata (filename, byte size)
    pub initial_metadata: Option<Value>,

    /// Worker-side EXIF metadata
    pub technical_metadata: Option<TechnicalMetadata>,

    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub altitude: Option<f64>,

    /// Rollup: at least one detection
    pub has_trash: bool,

    /// Rollup: maximum single-detection confidence, 0-100
    pub confidence: f64,

    /// Set exactly when status becomes Failed
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new Pending task
    pub fn new(uploader_id: impl Into<String>, initial_metadata: Option<Value>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            uploader_id: uploader_id.into(),
            status: TaskStatus::Pending,
            remote_path: None,
            assigned_worker: None,
            initial_metadata,
            technical_metadata: None,
            lat: None,
            lng: None,
            altitude: None,
            has_trash: false,
            confidence: 0.0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Extracting,
            TaskStatus::Processing,
            TaskStatus::Ready,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("UPLOADED"), None);
    }

    #[test]
    fn test_forward_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Extracting));
        assert!(TaskStatus::Extracting.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Ready));
    }

    #[test]
    fn test_no_stage_skipping() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Extracting));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Processing));
        assert!(!TaskStatus::Extracting.can_transition_to(TaskStatus::Ready));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Ready));
    }

    #[test]
    fn test_terminal_states_stay_terminal() {
        for terminal in [TaskStatus::Ready, TaskStatus::Failed] {
            for next in [
                TaskStatus::Pending,
                TaskStatus::Queued,
                TaskStatus::Extracting,
                TaskStatus::Processing,
                TaskStatus::Ready,
                TaskStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_recovery_demotions() {
        assert!(TaskStatus::Extracting.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Ready.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Extracting));
    }

    #[test]
    fn test_claimed_statuses() {
        assert!(TaskStatus::Extracting.is_claimed());
        assert!(TaskStatus::Processing.is_claimed());
        assert!(!TaskStatus::Queued.is_claimed());
        assert!(!TaskStatus::Ready.is_claimed());
        assert!(!TaskStatus::Failed.is_claimed());
    }

    #[test]
    fn test_status_serde_uppercase() {
        let json = serde_json::to_string(&TaskStatus::Extracting).unwrap();
        assert_eq!(json, "\"EXTRACTING\"");
        let parsed: TaskStatus = serde_json::from_str("\"READY\"").unwrap();
        assert_eq!(parsed, TaskStatus::Ready);
    }

    #[test]
    fn test_new_task_defaults() {
        let now = Utc::now();
        let task = Task::new("user-1", Some(serde_json::json!({"filename": "a.jpg"})), now);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_worker.is_none());
        assert!(!task.has_trash);
        assert_eq!(task.confidence, 0.0);
        assert_eq!(task.created_at, now);
    }

    fn status_strategy() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Pending),
            Just(TaskStatus::Queued),
            Just(TaskStatus::Extracting),
            Just(TaskStatus::Processing),
            Just(TaskStatus::Ready),
            Just(TaskStatus::Failed),
        ]
    }

    proptest! {
        /// Any legal transition chain is a forward walk of the pipeline
        /// (with recovery demotions), never leaving a terminal state.
        #[test]
        fn prop_transitions_never_leave_terminal(
            steps in proptest::collection::vec(status_strategy(), 1..20)
        ) {
            let mut current = TaskStatus::Pending;
            for next in steps {
                if current.can_transition_to(next) {
                    prop_assert!(!current.is_terminal());
                    // Stage order is preserved: Ready is only reachable
                    // from Processing.
                    if next == TaskStatus::Ready {
                        prop_assert_eq!(current, TaskStatus::Processing);
                    }
                    current = next;
                }
            }
        }
    }
}

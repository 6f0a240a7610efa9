//! Append-only status-event log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskStatus;

/// Action recorded for every pipeline transition
pub const STATUS_CHANGE_ACTION: &str = "STATUS_CHANGE";

/// Fallback reason when a task is failed without an explanation
pub const DEFAULT_FAILED_REASON: &str = "Failed for unknown reason";

/// Immutable audit entry for one status transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub id: Uuid,
    pub task_id: Uuid,
    pub worker_name: Option<String>,
    pub action: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Build the canonical log message for a status transition
pub fn status_change_message(status: TaskStatus, detail: Option<&str>) -> String {
    match detail {
        Some(detail) => format!("Status changed to {} ({})", status, detail),
        None => format!("Status changed to {}", status),
    }
}

/// Return the given reason, or the default when it is missing or blank
///
/// A FAILED task must always carry an explanation the client can surface.
pub fn failed_reason_or_default(reason: Option<&str>) -> String {
    match reason {
        Some(r) if !r.trim().is_empty() => r.to_string(),
        _ => DEFAULT_FAILED_REASON.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_change_message() {
        assert_eq!(
            status_change_message(TaskStatus::Queued, None),
            "Status changed to QUEUED"
        );
        assert_eq!(
            status_change_message(TaskStatus::Failed, Some("download error")),
            "Status changed to FAILED (download error)"
        );
    }

    #[test]
    fn test_failed_reason_or_default() {
        assert_eq!(failed_reason_or_default(Some("bad exif")), "bad exif");
        assert_eq!(failed_reason_or_default(Some("   ")), DEFAULT_FAILED_REASON);
        assert_eq!(failed_reason_or_default(None), DEFAULT_FAILED_REASON);
    }
}

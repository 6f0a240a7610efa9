//! Worker state domain type

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Conventional worker status labels
///
/// Worker status is free text (it surfaces directly on dashboards), but the
/// pipeline itself only ever writes these four.
pub mod worker_status {
    pub const ACTIVE: &str = "Active";
    pub const WORKING: &str = "Working";
    pub const OFFLINE: &str = "Offline";
    pub const PAUSED_RATE_LIMITED: &str = "Paused (Rate Limited)";
}

/// One named, persistent pipeline slot
///
/// The fleet is a fixed, pre-provisioned set of these rows; restarts seed
/// them idempotently so accumulated counters survive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerState {
    /// Unique name, stable for the process lifetime
    pub name: String,

    /// Free-text activity label
    pub status: String,

    /// Tasks completed since the last day rollover
    pub tasks_processed_today: i64,

    /// Date of the last counter reset (lazy per-worker rollover)
    pub last_reset_date: NaiveDate,

    /// Updated every loop iteration; staleness means the worker is dead
    pub last_ping: Option<DateTime<Utc>>,
}

impl WorkerState {
    /// Check if the worker's claim should be considered abandoned
    pub fn is_stale(&self, older_than: DateTime<Utc>) -> bool {
        match self.last_ping {
            Some(ping) => ping <= older_than,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_is_stale() {
        let threshold = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        let fresh = WorkerState {
            name: "Helios".to_string(),
            status: worker_status::ACTIVE.to_string(),
            tasks_processed_today: 0,
            last_reset_date: threshold.date_naive(),
            last_ping: Some(threshold + chrono::Duration::seconds(1)),
        };
        assert!(!fresh.is_stale(threshold));

        let stale = WorkerState {
            last_ping: Some(threshold - chrono::Duration::minutes(1)),
            ..fresh.clone()
        };
        assert!(stale.is_stale(threshold));

        let never_pinged = WorkerState {
            last_ping: None,
            ..fresh
        };
        assert!(never_pinged.is_stale(threshold));
    }
}

//! Status-change notifications
//!
//! Fire-and-forget: producers never block on delivery, and a notification
//! is only emitted after the underlying store transaction has committed.

use std::fmt;

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use mediastore::TaskStatus;

/// One user-facing status change
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub task_id: Uuid,
    pub uploader_id: String,
    pub status: TaskStatus,
    pub detail: Option<String>,
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} -> {} ({})", self.task_id, self.status, detail),
            None => write!(f, "{} -> {}", self.task_id, self.status),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, update: StatusUpdate);
}

/// Fan-out notifier backed by a broadcast channel
pub struct BroadcastNotifier {
    tx: broadcast::Sender<StatusUpdate>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, update: StatusUpdate) {
        // No subscribers is fine; the store log already has the event.
        if self.tx.send(update).is_err() {
            debug!("No notification subscribers");
        }
    }
}

/// Discards every notification (tests)
#[derive(Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _update: StatusUpdate) {}
}

//! Cooperative wake signal for idle workers
//!
//! Ingest and the reaper pulse the signal when new work lands in the queue
//! so idle workers re-check immediately instead of waiting out their full
//! sleep. The sleep is always bounded, so a missed pulse only costs one
//! idle interval, never liveness.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct WakeSignal {
    notify: Arc<Notify>,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every worker currently sleeping on the signal
    pub fn notify_all(&self) {
        self.notify.notify_waiters();
    }

    /// Sleep until nudged or until `max` elapses, whichever comes first
    pub async fn sleep(&self, max: Duration) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(max) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_nudge_cuts_sleep_short() {
        let signal = WakeSignal::new();
        let sleeper = signal.clone();

        let handle = tokio::spawn(async move {
            sleeper.sleep(Duration::from_secs(30)).await;
        });
        // Give the sleeper a chance to register before pulsing.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let start = Instant::now();
        signal.notify_all();
        handle.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_is_bounded_without_nudge() {
        let signal = WakeSignal::new();
        let start = Instant::now();
        signal.sleep(Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}

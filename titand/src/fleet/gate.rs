//! Shared rate-limit gate
//!
//! When remote storage answers with a rate-limit signal, one worker arms
//! the gate and the whole fleet pauses until the deadline passes. The gate
//! clears itself lazily on the next read; nothing has to tick it down.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
pub struct RateLimitGate {
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the gate for `retry_after` from now; a later deadline wins over
    /// an earlier one
    pub fn arm(&self, retry_after: Duration) {
        let new_deadline = Instant::now() + retry_after;
        let mut guard = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        match *guard {
            Some(existing) if existing >= new_deadline => {}
            _ => *guard = Some(new_deadline),
        }
    }

    /// Time left until the gate opens, or None if it is open
    pub fn remaining(&self) -> Option<Duration> {
        let mut guard = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        match *guard {
            Some(deadline) => {
                let now = Instant::now();
                if deadline > now {
                    Some(deadline - now)
                } else {
                    *guard = None;
                    None
                }
            }
            None => None,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.remaining().is_some()
    }
}

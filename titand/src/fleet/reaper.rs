//! The reaper - periodic recovery of stuck and orphaned work
//!
//! The first sweep runs at startup, so work orphaned by a crash is
//! recovered as soon as the daemon is back; after that, one sweep per
//! interval. While the rate-limit gate is armed sweeps are skipped and the
//! reaper re-checks on a shorter interval, so recovery resumes promptly
//! once the gate opens. Notifications and the wake pulse go out only after
//! the sweep transaction has committed.

use std::sync::Arc;

use tracing::{debug, error, info};

use mediastore::TaskStatus;

use crate::config::ReaperSettings;
use crate::notify::{Notifier, StatusUpdate};
use crate::state::StateHandle;

use super::{RateLimitGate, WakeSignal};

#[derive(Clone)]
pub struct ReaperContext {
    pub state: StateHandle,
    pub gate: RateLimitGate,
    pub wake: WakeSignal,
    pub notifier: Arc<dyn Notifier>,
    pub settings: ReaperSettings,
}

/// Run the reaper forever
pub async fn run(ctx: ReaperContext) {
    info!(
        interval_secs = ctx.settings.interval.as_secs(),
        "Reaper started"
    );
    loop {
        // While the gate is armed the external dependency is already
        // degraded; skip the sweep and re-check on the shorter interval.
        if ctx.gate.is_limited() {
            debug!("Rate-limit gate armed, skipping sweep");
            tokio::time::sleep(ctx.settings.recheck).await;
            continue;
        }

        sweep(&ctx).await;
        tokio::time::sleep(ctx.settings.interval).await;
    }
}

async fn sweep(ctx: &ReaperContext) {
    match ctx.state.reaper_sweep(ctx.settings.policy).await {
        Ok(outcome) => {
            if outcome.is_empty() {
                debug!("Sweep found nothing to recover");
                return;
            }
            info!(
                stale_queued = outcome.stale_queued,
                timed_out = outcome.timed_out.len(),
                recovered = outcome.recovered.len(),
                "Sweep recovered work"
            );
            for action in &outcome.timed_out {
                ctx.notifier.notify(StatusUpdate {
                    task_id: action.task_id,
                    uploader_id: action.uploader_id.clone(),
                    status: TaskStatus::Failed,
                    detail: Some(action.detail.clone()),
                });
            }
            for action in &outcome.recovered {
                ctx.notifier.notify(StatusUpdate {
                    task_id: action.task_id,
                    uploader_id: action.uploader_id.clone(),
                    status: TaskStatus::Queued,
                    detail: Some(action.detail.clone()),
                });
            }
            // Demoted or long-unclaimed queued work deserves an
            // immediate claim attempt.
            if outcome.stale_queued > 0 || !outcome.recovered.is_empty() {
                ctx.wake.notify_all();
            }
        }
        Err(e) => error!(error = %e, "Sweep failed"),
    }
}

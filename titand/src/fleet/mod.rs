//! The worker fleet and its recovery machinery

mod gate;
mod reaper;
mod signal;
mod worker_loop;

pub use gate::RateLimitGate;
pub use reaper::ReaperContext;
pub use signal::WakeSignal;
pub use worker_loop::WorkerContext;

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mediastore::worker_status;

use crate::config::{PipelineTimings, ReaperSettings};
use crate::notify::Notifier;
use crate::objstore::ObjectStore;
use crate::state::{StateError, StateHandle};

/// A running fleet of worker loops plus the reaper
pub struct Fleet {
    names: Vec<String>,
    state: StateHandle,
    handles: Vec<JoinHandle<()>>,
}

impl Fleet {
    /// Seed worker rows and spawn one loop per name, plus the reaper
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn(
        names: Vec<String>,
        state: StateHandle,
        objects: Arc<dyn ObjectStore>,
        gate: RateLimitGate,
        wake: WakeSignal,
        notifier: Arc<dyn Notifier>,
        timings: PipelineTimings,
        reaper: ReaperSettings,
    ) -> Result<Self, StateError> {
        state.seed_fleet(names.clone()).await?;

        let mut handles = Vec::with_capacity(names.len() + 1);
        for name in &names {
            let ctx = WorkerContext {
                name: name.clone(),
                state: state.clone(),
                objects: objects.clone(),
                gate: gate.clone(),
                wake: wake.clone(),
                notifier: notifier.clone(),
                timings,
            };
            handles.push(tokio::spawn(worker_loop::run(ctx)));
        }
        handles.push(tokio::spawn(reaper::run(ReaperContext {
            state: state.clone(),
            gate,
            wake,
            notifier,
            settings: reaper,
        })));

        info!(workers = names.len(), "Fleet spawned");
        Ok(Self { names, state, handles })
    }

    /// Stop every loop and mark the fleet offline
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        join_all(self.handles).await;

        for name in &self.names {
            if let Err(e) = self.state.set_worker_status(name, worker_status::OFFLINE).await {
                warn!(worker = %name, error = %e, "Could not mark worker offline");
            }
        }
        info!("Fleet stopped");
    }
}

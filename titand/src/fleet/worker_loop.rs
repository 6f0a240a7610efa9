//! The per-worker pipeline loop
//!
//! Each worker is an endless loop: heartbeat, honor the rate-limit gate,
//! try to claim the oldest queued task, and run it through extraction and
//! detection. A Conflict from any guarded transition means the task moved
//! underneath us (usually a reaper demotion) and the iteration is
//! abandoned without marking anything failed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use mediastore::{worker_status, Task, TaskStatus, TechnicalMetadata};

use crate::config::PipelineTimings;
use crate::media::{extract_technical, simulate_detections};
use crate::notify::{Notifier, StatusUpdate};
use crate::objstore::{ObjectStore, ObjectStoreError};
use crate::state::{StateError, StateHandle};

use super::{RateLimitGate, WakeSignal};

/// Everything one worker loop needs
#[derive(Clone)]
pub struct WorkerContext {
    pub name: String,
    pub state: StateHandle,
    pub objects: Arc<dyn ObjectStore>,
    pub gate: RateLimitGate,
    pub wake: WakeSignal,
    pub notifier: Arc<dyn Notifier>,
    pub timings: PipelineTimings,
}

enum ProcessError {
    /// Remote storage pushed back; release the claim and arm the gate
    RateLimited {
        retry_after: Duration,
        stage: TaskStatus,
    },
    /// A store operation failed (including guard conflicts) while the task
    /// was in `stage`
    State {
        source: StateError,
        stage: TaskStatus,
    },
    /// This task cannot be processed; fail it with the reason
    Fatal(String),
}

fn state_err(stage: TaskStatus) -> impl Fn(StateError) -> ProcessError {
    move |source| ProcessError::State { source, stage }
}

/// Run one worker forever
pub async fn run(ctx: WorkerContext) {
    info!(worker = %ctx.name, "Worker loop started");
    loop {
        if let Err(e) = iteration(&ctx).await {
            if e.is_conflict() {
                warn!(worker = %ctx.name, error = %e, "Task moved underneath worker, abandoning iteration");
            } else {
                error!(worker = %ctx.name, error = %e, "Worker iteration failed");
                tokio::time::sleep(ctx.timings.error_backoff).await;
            }
        }
    }
}

async fn iteration(ctx: &WorkerContext) -> Result<(), StateError> {
    ctx.state.heartbeat(&ctx.name).await?;

    // While the gate is armed the worker keeps heartbeating (so the reaper
    // never mistakes it for dead) but claims nothing.
    if let Some(wait) = ctx.gate.remaining() {
        ctx.state
            .set_worker_status(&ctx.name, worker_status::PAUSED_RATE_LIMITED)
            .await?;
        debug!(worker = %ctx.name, wait_ms = wait.as_millis() as u64, "Rate-limit gate armed, pausing");
        ctx.wake.sleep(wait.min(ctx.timings.cooldown_check)).await;
        return Ok(());
    }

    let Some(task) = ctx.state.claim_next(&ctx.name).await? else {
        ctx.wake.sleep(ctx.timings.idle_sleep).await;
        return Ok(());
    };

    info!(worker = %ctx.name, task_id = %task.id, "Claimed task");
    ctx.state
        .set_worker_status(&ctx.name, worker_status::WORKING)
        .await?;

    match process(ctx, &task).await {
        Ok(()) => {
            ctx.state.record_task_processed(&ctx.name).await?;
            ctx.state
                .set_worker_status(&ctx.name, worker_status::ACTIVE)
                .await?;
        }
        Err(ProcessError::RateLimited { retry_after, stage }) => {
            warn!(
                worker = %ctx.name,
                task_id = %task.id,
                retry_after_ms = retry_after.as_millis() as u64,
                "Remote storage rate limited, releasing claim"
            );
            ctx.gate.arm(retry_after);
            ctx.state
                .requeue(task.id, stage, &ctx.name, "rate limited, requeued")
                .await?;
            ctx.state
                .set_worker_status(&ctx.name, worker_status::PAUSED_RATE_LIMITED)
                .await?;
        }
        Err(ProcessError::State { source, stage }) => {
            if !source.is_conflict() {
                // A store failure mid-claim must not strand the task in a
                // working status with a dead assignment.
                release_claim(ctx, &task, stage).await;
            }
            ctx.state
                .set_worker_status(&ctx.name, worker_status::ACTIVE)
                .await?;
            return Err(source);
        }
        Err(ProcessError::Fatal(reason)) => {
            warn!(worker = %ctx.name, task_id = %task.id, %reason, "Task failed");
            ctx.state
                .mark_failed(task.id, Some(&reason), Some(&ctx.name))
                .await?;
            ctx.notifier.notify(StatusUpdate {
                task_id: task.id,
                uploader_id: task.uploader_id.clone(),
                status: TaskStatus::Failed,
                detail: Some(reason),
            });
            ctx.state
                .set_worker_status(&ctx.name, worker_status::ACTIVE)
                .await?;
        }
    }
    Ok(())
}

/// Run a freshly claimed task through both pipeline stages
async fn process(ctx: &WorkerContext, task: &Task) -> Result<(), ProcessError> {
    let remote_path = task
        .remote_path
        .as_deref()
        .ok_or_else(|| ProcessError::Fatal("claimed task has no remote path".to_string()))?;

    ctx.notifier.notify(StatusUpdate {
        task_id: task.id,
        uploader_id: task.uploader_id.clone(),
        status: TaskStatus::Extracting,
        detail: None,
    });

    // Stage 1: extraction
    let bytes = match ctx.objects.get(remote_path).await {
        Ok(bytes) => bytes,
        Err(ObjectStoreError::RateLimited { retry_after }) => {
            return Err(ProcessError::RateLimited {
                retry_after,
                stage: TaskStatus::Extracting,
            })
        }
        Err(e) => return Err(ProcessError::Fatal(format!("download failed: {}", e))),
    };

    tokio::time::sleep(ctx.timings.extraction_delay).await;

    let meta = match extract_technical(&bytes) {
        Ok(meta) => meta,
        Err(e) => {
            // Artifacts without EXIF are normal; the task proceeds with
            // empty technical metadata.
            debug!(worker = %ctx.name, task_id = %task.id, error = %e, "No technical metadata extracted");
            TechnicalMetadata::default()
        }
    };
    ctx.state
        .set_technical_metadata(task.id, meta, &ctx.name)
        .await
        .map_err(state_err(TaskStatus::Extracting))?;
    ctx.state
        .advance(
            task.id,
            TaskStatus::Extracting,
            TaskStatus::Processing,
            Some(&ctx.name),
            None,
        )
        .await
        .map_err(state_err(TaskStatus::Extracting))?;
    ctx.notifier.notify(StatusUpdate {
        task_id: task.id,
        uploader_id: task.uploader_id.clone(),
        status: TaskStatus::Processing,
        detail: None,
    });

    // Stage 2: detection
    tokio::time::sleep(ctx.timings.processing_delay).await;
    let detections = simulate_detections(&mut rand::rng());
    let detection_count = detections.len();
    ctx.state
        .replace_detections(task.id, detections, &ctx.name)
        .await
        .map_err(state_err(TaskStatus::Processing))?;
    ctx.state
        .advance(
            task.id,
            TaskStatus::Processing,
            TaskStatus::Ready,
            Some(&ctx.name),
            None,
        )
        .await
        .map_err(state_err(TaskStatus::Processing))?;
    ctx.notifier.notify(StatusUpdate {
        task_id: task.id,
        uploader_id: task.uploader_id.clone(),
        status: TaskStatus::Ready,
        detail: None,
    });

    info!(worker = %ctx.name, task_id = %task.id, detection_count, "Task ready");
    Ok(())
}

/// Hand a claimed task back to the queue after a mid-claim failure.
///
/// A Conflict here means someone else (the reaper, typically) already moved
/// the task, which is exactly the outcome we wanted.
async fn release_claim(ctx: &WorkerContext, task: &Task, stage: TaskStatus) {
    match ctx
        .state
        .requeue(task.id, stage, &ctx.name, "worker error, requeued")
        .await
    {
        Ok(()) => {
            info!(worker = %ctx.name, task_id = %task.id, "Released claim after worker error");
        }
        Err(e) if e.is_conflict() => {
            debug!(worker = %ctx.name, task_id = %task.id, "Claim already released elsewhere");
        }
        Err(e) => {
            warn!(worker = %ctx.name, task_id = %task.id, error = %e, "Failed to release claim");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mediastore::Store;

    use crate::config::TimingConfig;
    use crate::notify::NullNotifier;
    use crate::objstore::MemoryObjectStore;

    fn test_ctx(state: StateHandle, objects: Arc<MemoryObjectStore>) -> WorkerContext {
        let mut timings = TimingConfig::default().pipeline();
        timings.extraction_delay = Duration::from_millis(300);
        timings.processing_delay = Duration::from_millis(5);
        WorkerContext {
            name: "Helios".to_string(),
            state,
            objects,
            gate: RateLimitGate::new(),
            wake: WakeSignal::new(),
            notifier: Arc::new(NullNotifier),
            timings,
        }
    }

    async fn queued_task(state: &StateHandle, objects: &MemoryObjectStore) -> Task {
        let task = state.create_task("user-1", None).await.unwrap();
        let path = format!("media/{}", task.id);
        objects.put(&path, b"not-a-jpeg".to_vec()).await.unwrap();
        state.mark_uploaded(task.id, &path).await.unwrap();
        state.get_task(task.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_lost_claim_aborts_iteration_and_resets_worker_status() {
        let state = StateHandle::with_store(Store::open_in_memory().unwrap());
        let objects = Arc::new(MemoryObjectStore::new());
        state
            .seed_fleet(vec!["Helios".to_string(), "Eos".to_string()])
            .await
            .unwrap();
        let task = queued_task(&state, &objects).await;

        let ctx = test_ctx(state.clone(), objects);
        let handle = {
            let ctx = ctx.clone();
            tokio::spawn(async move { iteration(&ctx).await })
        };

        // Yank the task away mid-extraction and hand it to another worker.
        tokio::time::sleep(Duration::from_millis(100)).await;
        state
            .requeue(task.id, TaskStatus::Extracting, "Helios", "reaper recovery")
            .await
            .unwrap();
        let stolen = state.claim_next("Eos").await.unwrap().unwrap();
        assert_eq!(stolen.id, task.id);

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ref e) if e.is_conflict()));

        // The new owner keeps the claim and the losing worker is no longer
        // reported as Working.
        let loaded = state.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.assigned_worker.as_deref(), Some("Eos"));
        let workers = state.list_workers().await.unwrap();
        let helios = workers.iter().find(|w| w.name == "Helios").unwrap();
        assert_eq!(helios.status, worker_status::ACTIVE);
    }

    #[tokio::test]
    async fn test_release_claim_returns_task_to_queue() {
        let state = StateHandle::with_store(Store::open_in_memory().unwrap());
        let objects = Arc::new(MemoryObjectStore::new());
        state.seed_fleet(vec!["Helios".to_string()]).await.unwrap();
        let task = queued_task(&state, &objects).await;
        let claimed = state.claim_next("Helios").await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);

        let ctx = test_ctx(state.clone(), objects);
        release_claim(&ctx, &task, TaskStatus::Extracting).await;

        let loaded = state.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Queued);
        assert!(loaded.assigned_worker.is_none());

        // Releasing again is a harmless no-op.
        release_claim(&ctx, &task, TaskStatus::Extracting).await;
        let loaded = state.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Queued);
    }
}

//! Daemon wiring: store, fleet, reaper and notification fan-out

use std::sync::Arc;

use eyre::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::fleet::{Fleet, RateLimitGate, WakeSignal};
use crate::notify::BroadcastNotifier;
use crate::objstore::{HttpObjectStore, ObjectStore};
use crate::state::StateHandle;

/// Run the daemon until Ctrl-C
pub async fn run(config: Config) -> Result<()> {
    let data_dir = config.storage.resolved_data_dir();
    let state = StateHandle::spawn(&data_dir)?;

    let token = std::env::var(&config.storage.token_env).ok();
    if token.is_none() {
        warn!(
            env = %config.storage.token_env,
            "No storage token in environment, requests go out unauthenticated"
        );
    }
    let objects: Arc<dyn ObjectStore> =
        Arc::new(HttpObjectStore::new(config.storage.base_url.clone(), token));

    let gate = RateLimitGate::new();
    let wake = WakeSignal::new();
    let notifier = Arc::new(BroadcastNotifier::new(64));

    // Surface committed status changes in the daemon log; this is where a
    // push transport would subscribe.
    let mut updates = notifier.subscribe();
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            info!(uploader = %update.uploader_id, "Status update: {}", update);
        }
    });

    let fleet = Fleet::spawn(
        config.fleet.names.clone(),
        state,
        objects,
        gate,
        wake,
        notifier,
        config.timing.pipeline(),
        config.timing.reaper(),
    )
    .await
    .map_err(|e| eyre::eyre!("failed to start fleet: {}", e))?;

    info!(store = %data_dir.display(), "titand running, Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    fleet.shutdown().await;
    Ok(())
}

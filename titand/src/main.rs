//! titand CLI entry point

use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use titand::cli::{Cli, Command};
use titand::config::Config;
use titand::daemon;
use titand::fleet::{RateLimitGate, WakeSignal};
use titand::ingest::Ingestor;
use titand::notify::NullNotifier;
use titand::objstore::HttpObjectStore;
use titand::state::StateHandle;

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("titand=info,mediastore=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref())?;

    match cli.command {
        Command::Run => daemon::run(config).await,
        Command::Status => status(&config).await,
        Command::Submit { file, uploader } => submit(&config, &uploader, &file).await,
        Command::Show { task_id } => show(&config, &task_id).await,
    }
}

fn colored_task_status(status: mediastore::TaskStatus) -> colored::ColoredString {
    use mediastore::TaskStatus::*;
    match status {
        Pending => status.as_str().dimmed(),
        Queued => status.as_str().cyan(),
        Extracting | Processing => status.as_str().yellow(),
        Ready => status.as_str().green(),
        Failed => status.as_str().red(),
    }
}

fn colored_worker_status(status: &str) -> colored::ColoredString {
    match status {
        mediastore::worker_status::ACTIVE => status.green(),
        mediastore::worker_status::WORKING => status.yellow(),
        mediastore::worker_status::PAUSED_RATE_LIMITED => status.magenta(),
        _ => status.dimmed(),
    }
}

async fn status(config: &Config) -> Result<()> {
    let state = StateHandle::spawn(config.storage.resolved_data_dir())?;
    let run_err = |e| eyre::eyre!("state error: {}", e);

    println!("{}", "Tasks".bold());
    for status in [
        mediastore::TaskStatus::Pending,
        mediastore::TaskStatus::Queued,
        mediastore::TaskStatus::Extracting,
        mediastore::TaskStatus::Processing,
        mediastore::TaskStatus::Ready,
        mediastore::TaskStatus::Failed,
    ] {
        let count = state.list_tasks_by_status(status).await.map_err(run_err)?.len();
        println!("  {:<12} {}", colored_task_status(status), count);
    }
    let depth = state.queue_depth().await.map_err(run_err)?;
    println!("  queue depth  {}", depth);

    let stale_cutoff = Utc::now() - config.timing.reaper().policy.stale_after;

    println!("\n{}", "Fleet".bold());
    for worker in state.list_workers().await.map_err(run_err)? {
        let stale_marker = if worker.is_stale(stale_cutoff) { " (stale)".red() } else { "".normal() };
        println!(
            "  {:<10} {:<22} {:>4} today{}",
            worker.name,
            colored_worker_status(&worker.status),
            worker.tasks_processed_today,
            stale_marker,
        );
    }
    Ok(())
}

async fn submit(config: &Config, uploader: &str, file: &std::path::Path) -> Result<()> {
    let state = StateHandle::spawn(config.storage.resolved_data_dir())?;
    let token = std::env::var(&config.storage.token_env).ok();
    let objects = std::sync::Arc::new(HttpObjectStore::new(config.storage.base_url.clone(), token));

    // One-shot CLI process: status changes land in the store's event log,
    // there is no daemon subscriber to fan out to.
    let ingestor = Ingestor::new(
        state,
        objects,
        RateLimitGate::new(),
        WakeSignal::new(),
        std::sync::Arc::new(NullNotifier),
    );
    let task_id = ingestor
        .ingest_file(uploader, file)
        .await
        .context("Ingest failed")?;
    println!("queued {}", task_id);
    Ok(())
}

async fn show(config: &Config, task_id: &str) -> Result<()> {
    let task_id = Uuid::parse_str(task_id).context("Invalid task id")?;
    let state = StateHandle::spawn(config.storage.resolved_data_dir())?;
    let run_err = |e| eyre::eyre!("state error: {}", e);

    let Some(task) = state.get_task(task_id).await.map_err(run_err)? else {
        println!("task {} not found", task_id);
        return Ok(());
    };

    println!("{} {}", task.id, colored_task_status(task.status));
    println!("  uploader   {}", task.uploader_id);
    if let Some(remote) = &task.remote_path {
        println!("  remote     {}", remote);
    }
    if let Some(worker) = &task.assigned_worker {
        println!("  worker     {}", worker);
    }
    if let (Some(lat), Some(lng)) = (task.lat, task.lng) {
        println!("  location   {:.6}, {:.6}", lat, lng);
    }
    if task.has_trash {
        println!("  detection  confidence {:.1}", task.confidence);
    }
    if let Some(reason) = &task.failure_reason {
        println!("  failure    {}", reason.red());
    }

    println!("\n{}", "History".bold());
    for event in state.events_for(task_id).await.map_err(run_err)? {
        let who = event.worker_name.as_deref().unwrap_or("-");
        println!(
            "  {}  {:<10} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            who,
            event.message
        );
    }
    Ok(())
}

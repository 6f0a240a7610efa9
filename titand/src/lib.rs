//! titand - media ingest and analysis pipeline daemon
//!
//! A fixed fleet of named workers drains a durable task queue through the
//! extraction and detection stages, coordinated only through the store: a
//! status-guarded claim protocol gives each task to at most one worker, a
//! reaper recovers work orphaned by dead workers, and a shared rate-limit
//! gate pauses the whole fleet when remote storage pushes back.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod fleet;
pub mod ingest;
pub mod media;
pub mod notify;
pub mod objstore;
pub mod state;

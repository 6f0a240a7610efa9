//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "titand", about = "Media ingest and analysis pipeline daemon", version)]
pub struct Cli {
    /// Path to a config file (overrides the lookup chain)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the worker fleet and reaper
    Run,

    /// Show queue depth, task counts and fleet state
    Status,

    /// Upload a file and queue it for the pipeline
    Submit {
        /// File to ingest
        file: PathBuf,

        /// Uploader identity recorded on the task
        #[arg(short, long, default_value = "local")]
        uploader: String,
    },

    /// Show one task and its status-event history
    Show {
        /// Task id
        task_id: String,
    },
}

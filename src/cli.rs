use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vodforge::JobId;

#[derive(Parser)]
#[command(name = "vodforge")]
#[command(author, version, about = "Video ingest pipeline: HLS transcoding and storage tiering")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker pool and reconcile sweeps until interrupted
    Start,

    /// Accept a source file and queue its conversion
    Submit {
        /// Source media file
        #[arg(required = true)]
        file: PathBuf,

        /// Category code (first level of the artifact layout)
        #[arg(long)]
        category: String,

        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Show a job's status, progress and error
    Status {
        job: JobId,

        /// Resolve the artifact pointer before printing
        #[arg(long)]
        resolve: bool,
    },

    /// Retry a failed job
    Retry { job: JobId },

    /// Queue a completed job for migration to the remote tier
    Migrate { job: JobId },

    /// Delete a job and everything it owns
    Delete { job: JobId },

    /// Reconcile artifact pointers and fail stale jobs
    Reconcile,

    /// Repair and normalize an HLS manifest in place
    Normalize {
        /// Manifest file
        #[arg(required = true)]
        manifest: PathBuf,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

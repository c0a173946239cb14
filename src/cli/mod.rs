//! CLI module for clipdex.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// clipdex - video transcript indexing pipeline
///
/// Fetches audio for registered videos, transcribes it, and indexes the
/// transcript for semantic search. Work is queued and run by workers.
#[derive(Parser, Debug)]
#[command(name = "clipdex")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "CLIPDEX_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter directive: `-v` flags win over the configured level.
    pub fn log_directive(&self, configured: &str) -> String {
        let level = match self.verbose {
            0 => configured,
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        format!("clipdex={}", level)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a video in the catalog
    Add {
        /// External content ID (e.g. a YouTube video ID)
        external_id: String,

        /// Video title
        #[arg(long, default_value = "")]
        title: String,

        /// View count snapshot
        #[arg(long, default_value = "0")]
        views: u64,

        /// Like count snapshot
        #[arg(long, default_value = "0")]
        likes: u64,

        /// Duration in seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Queue the item for processing right away
        #[arg(short, long)]
        enqueue: bool,
    },

    /// Queue every item that is SYNCED or ERROR
    Sync {
        /// Queue to route tasks to (defaults to queue.pipeline_queue)
        #[arg(short, long)]
        queue: Option<String>,
    },

    /// Queue specific items for processing
    Enqueue {
        /// Item IDs
        #[arg(required = true)]
        item_ids: Vec<i64>,

        /// Re-index items even if they are complete
        #[arg(long)]
        reindex: bool,

        /// Queue to route tasks to (defaults to queue.pipeline_queue)
        #[arg(short, long)]
        queue: Option<String>,

        /// Wait up to this many seconds for each item to finish
        #[arg(long)]
        wait: Option<u64>,
    },

    /// Run the pipeline for an item in this process
    Process {
        /// Item ID
        item_id: i64,

        /// Re-index even if the item is complete
        #[arg(long)]
        force_reindex: bool,
    },

    /// Run queue workers until Ctrl-C
    Worker {
        /// Queues to consume (defaults to queue.queues)
        #[arg(short, long)]
        queue: Vec<String>,

        /// Number of concurrent workers (defaults to queue.workers)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show an item's pipeline status
    Status {
        /// Item ID
        item_id: i64,
    },

    /// Show a queued task
    Task {
        /// Task ID returned by enqueue
        task_id: String,
    },

    /// List catalog items
    List {
        /// Only items in this status (e.g. synced, error, complete)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Semantic search over indexed transcripts
    Search {
        /// Search query
        query: String,

        /// Restrict to one video
        #[arg(short, long)]
        external_id: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Delete an item and its indexed chunks
    Delete {
        /// Item ID
        item_id: i64,
    },

    /// Show catalog, index and queue statistics
    Stats,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "chunking.chunk_size")
        key: String,
        /// Configuration value
        value: String,
    },

    /// Show configuration file path
    Path,
}

//! # resync
//!
//! Drive the resync queue and conflict engine from the command line.
//!
//! ## Commands
//!
//! - `enqueue`: Buffer a local mutation
//! - `sync`: Run one upload cycle
//! - `status`: Show queue, checkpoint and conflict status
//! - `retry` / `cleanup`: Handle failed items
//! - `conflicts` / `resolve`: Manual conflict resolution
//! - `audit`: Show the resolution audit trail
//!
//! ## Example
//!
//! ```bash
//! resync enqueue tasks create '{"id": "t1", "title": "Ship"}' --priority high
//! resync sync
//! resync conflicts
//! resync resolve 1b4e28ba-2fa1-11d2-883f-0016d3cca427 --keep-local
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use resync_types::{ManualDecision, Operation, Priority};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{audit, conflicts, enqueue, status, sync};
use config::CliConfig;

/// Offline record sync: queue mutations, upload them, resolve conflicts.
#[derive(Parser, Debug)]
#[command(name = "resync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory holding the databases and resync.toml
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/resync.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Buffer a local mutation
    Enqueue {
        /// Target store: contacts, events or tasks
        store: String,

        /// create, update or delete
        operation: Operation,

        /// Record as a JSON object
        payload: String,

        /// high, normal or low
        #[arg(long, short, default_value = "normal")]
        priority: Priority,
    },

    /// Run one sync cycle
    Sync {
        /// Start even if another cycle is running
        #[arg(long)]
        force: bool,

        /// Treat the remote as unreachable
        #[arg(long)]
        offline: bool,
    },

    /// Show queue and conflict status
    Status,

    /// Reset failed items and run a cycle
    Retry,

    /// Remove items that ran out of attempts
    Cleanup,

    /// List conflicts waiting for a decision
    Conflicts,

    /// Decide a conflict
    Resolve {
        /// Conflict id
        id: String,

        #[command(flatten)]
        decision: DecisionArgs,
    },

    /// Show the audit trail, newest first
    Audit {
        /// Maximum entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct DecisionArgs {
    /// Keep the local record
    #[arg(long)]
    keep_local: bool,

    /// Take the remote record
    #[arg(long)]
    keep_remote: bool,

    /// Merge both records
    #[arg(long)]
    merge: bool,

    /// Explicit field values as a JSON object
    #[arg(long, value_name = "JSON")]
    fields: Option<String>,
}

impl DecisionArgs {
    fn into_decision(self) -> Result<ManualDecision> {
        if self.keep_local {
            Ok(ManualDecision::KeepLocal)
        } else if self.keep_remote {
            Ok(ManualDecision::KeepRemote)
        } else if self.merge {
            Ok(ManualDecision::Merge)
        } else if let Some(json) = self.fields {
            conflicts::fields_decision(&json)
        } else {
            anyhow::bail!("Must specify one of --keep-local, --keep-remote, --merge or --fields");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let config = CliConfig::load(&data_dir, cli.config.as_deref()).await?;
    let queue = commands::open(&data_dir, &config).await?;

    match cli.command {
        Commands::Enqueue {
            store,
            operation,
            payload,
            priority,
        } => {
            enqueue::run(&queue, &store, operation, &payload, priority).await?;
        }
        Commands::Sync { force, offline } => {
            sync::run(&queue, force, offline).await?;
        }
        Commands::Status => {
            status::run(&queue).await?;
        }
        Commands::Retry => {
            sync::retry(&queue).await?;
        }
        Commands::Cleanup => {
            sync::cleanup(&queue).await?;
        }
        Commands::Conflicts => {
            conflicts::list(&queue).await?;
        }
        Commands::Resolve { id, decision } => {
            conflicts::resolve(&queue, &id, decision.into_decision()?).await?;
        }
        Commands::Audit { limit } => {
            audit::run(&queue, limit).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for resync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "resync", "resync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

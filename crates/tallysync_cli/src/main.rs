//! TallySync CLI
//!
//! Command-line tools for inspecting and repairing a TallySync data
//! directory while the client is not running.
//!
//! # Commands
//!
//! - `queue` - List, enqueue, remove or discard queued operations
//! - `cache` - Read, clear or purge the report cache
//! - `status` - Show the last successful sync and the queue depth

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TallySync offline data tools.
#[derive(Parser)]
#[command(name = "tallysync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or edit the operation queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Inspect or edit the report cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show sync metadata and queue depth
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum QueueAction {
    /// List every queued operation in dispatch order
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Queue an operation for the next sync pass
    Enqueue {
        /// Operation kind (e.g. calculate-tax)
        kind: String,

        /// JSON payload
        payload: String,

        /// Maximum queue length
        #[arg(short, long, default_value = "10")]
        capacity: usize,
    },

    /// Remove an operation regardless of its status
    Remove {
        /// Operation ID
        id: String,
    },

    /// Remove an operation that failed terminally
    Discard {
        /// Operation ID
        id: String,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print a cached value if it has not expired
    Get {
        /// Cache key, without the prefix
        key: String,
    },

    /// List cache keys, live or expired
    Keys,

    /// Delete every cache entry
    Clear,

    /// Delete expired cache entries
    Purge,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Queue { action } => {
            let path = cli.path.ok_or("Data path required for queue")?;
            match action {
                QueueAction::List { format } => commands::queue::run_list(&path, &format)?,
                QueueAction::Enqueue {
                    kind,
                    payload,
                    capacity,
                } => {
                    let op = commands::queue::enqueue(&path, &kind, &payload, capacity)?;
                    println!("Queued {} ({})", op.id, op.kind.name());
                }
                QueueAction::Remove { id } => {
                    if commands::queue::remove(&path, &id)? {
                        println!("Removed {}", id);
                    } else {
                        return Err(format!("No queued operation {}", id).into());
                    }
                }
                QueueAction::Discard { id } => {
                    if commands::queue::discard(&path, &id)? {
                        println!("Discarded {}", id);
                    } else {
                        return Err(format!("No failed operation {}", id).into());
                    }
                }
            }
        }
        Commands::Cache { action } => {
            let path = cli.path.ok_or("Data path required for cache")?;
            match action {
                CacheAction::Get { key } => match commands::cache::get(&path, &key)? {
                    Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                    None => return Err(format!("No live cache entry {}", key).into()),
                },
                CacheAction::Keys => {
                    for key in commands::cache::keys(&path)? {
                        println!("{}", key);
                    }
                }
                CacheAction::Clear => {
                    println!("Cleared {} entries", commands::cache::clear(&path)?);
                }
                CacheAction::Purge => {
                    println!("Purged {} expired entries", commands::cache::purge(&path)?);
                }
            }
        }
        Commands::Status { format } => {
            let path = cli.path.ok_or("Data path required for status")?;
            commands::status::run(&path, &format)?;
        }
        Commands::Version => {
            println!("TallySync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

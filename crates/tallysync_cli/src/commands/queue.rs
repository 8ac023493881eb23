//! Queue commands.

use super::open_store;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tallysync_engine::{OperationLog, OverflowPolicy, SyncConfig, SystemClock};
use tallysync_protocol::{Operation, OperationKind, OperationStatus};

/// One queued operation as shown by `queue list`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Operation ID.
    pub id: String,
    /// Kind name.
    pub kind: String,
    /// Current status.
    pub status: OperationStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Enqueue time in milliseconds since the epoch.
    pub enqueued_at: u64,
    /// Error of the last failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<Operation> for QueueEntry {
    fn from(op: Operation) -> Self {
        Self {
            kind: op.kind.name().to_string(),
            id: op.id,
            status: op.status,
            retry_count: op.retry_count,
            enqueued_at: op.enqueued_at,
            last_error: op.last_error,
        }
    }
}

fn open_log(
    path: &Path,
    create: bool,
    capacity: usize,
) -> Result<OperationLog, Box<dyn std::error::Error>> {
    let store = open_store(path, create)?;
    Ok(OperationLog::open(
        store,
        Arc::new(SystemClock),
        capacity,
        OverflowPolicy::Reject,
    )?)
}

fn default_capacity() -> usize {
    SyncConfig::default().queue_capacity
}

/// Returns every queued operation in dispatch order.
///
/// Reads the store as found; operations left in flight are listed as such.
pub fn list(path: &Path) -> Result<Vec<QueueEntry>, Box<dyn std::error::Error>> {
    let store = open_store(path, false)?;
    let ops = OperationLog::snapshot(store.as_ref())?;
    Ok(ops.into_iter().map(QueueEntry::from).collect())
}

/// Runs `queue list`.
pub fn run_list(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries = list(path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => print_text_output(&entries),
    }

    Ok(())
}

/// Validates and queues an operation.
///
/// A full queue is an error here; the CLI never evicts.
pub fn enqueue(
    path: &Path,
    kind: &str,
    payload: &str,
    capacity: usize,
) -> Result<Operation, Box<dyn std::error::Error>> {
    let payload: serde_json::Value = serde_json::from_str(payload)?;
    let kind = OperationKind::from_parts(kind, payload)?;
    let log = open_log(path, true, capacity)?;
    Ok(log.enqueue(kind)?)
}

/// Removes an operation. Returns false if no such operation exists.
pub fn remove(path: &Path, id: &str) -> Result<bool, Box<dyn std::error::Error>> {
    let log = open_log(path, false, default_capacity())?;
    Ok(log.remove(id)?)
}

/// Removes a failed operation. Returns false if `id` is missing or not failed.
pub fn discard(path: &Path, id: &str) -> Result<bool, Box<dyn std::error::Error>> {
    let log = open_log(path, false, default_capacity())?;
    Ok(log.discard(id)?)
}

fn print_text_output(entries: &[QueueEntry]) {
    println!("Queued operations ({} total)", entries.len());
    println!("================");
    println!();

    for entry in entries {
        print!(
            "{} {:20} {:?} retries={}",
            entry.id, entry.kind, entry.status, entry.retry_count
        );
        if let Some(ref error) = entry.last_error {
            print!(" error={}", error);
        }
        println!();
    }
}



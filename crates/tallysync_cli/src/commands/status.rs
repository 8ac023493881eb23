//! Status command implementation.

use super::open_store;
use serde::Serialize;
use std::path::Path;
use tallysync_engine::{OperationLog, SyncConfig, SYNC_METADATA_KEY};
use tallysync_protocol::{OperationStatus, SyncMetadata};

/// Offline state of a data directory.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Data directory path.
    pub path: String,
    /// Metadata of the last successful pass, if any.
    pub last_sync: Option<SyncMetadata>,
    /// Operations waiting for their first attempt.
    pub pending: usize,
    /// Operations whose last attempt failed.
    pub failed: usize,
    /// Failed operations that will not be retried.
    pub exhausted: usize,
}

/// Collects the status of the data directory at `path`.
pub fn collect(path: &Path) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let store = open_store(path, false)?;
    let config = SyncConfig::default();

    let last_sync = match store.get(SYNC_METADATA_KEY)? {
        Some(bytes) => Some(serde_json::from_slice::<SyncMetadata>(&bytes)?),
        None => None,
    };

    let ops = OperationLog::snapshot(store.as_ref())?;
    let max_retries = config.retry.max_retries;

    Ok(StatusReport {
        path: path.display().to_string(),
        last_sync,
        pending: ops
            .iter()
            .filter(|op| op.status == OperationStatus::Pending)
            .count(),
        failed: ops
            .iter()
            .filter(|op| op.status == OperationStatus::Failed)
            .count(),
        exhausted: ops.iter().filter(|op| op.is_exhausted(max_retries)).count(),
    })
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = collect(path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            println!("Data directory: {}", report.path);
            match report.last_sync {
                Some(ref meta) => println!(
                    "Last sync:      {} ms ({} {})",
                    meta.last_sync, meta.platform, meta.version
                ),
                None => println!("Last sync:      never"),
            }
            println!("Pending:        {}", report.pending);
            println!("Failed:         {}", report.failed);
            println!("Exhausted:      {}", report.exhausted);
        }
    }

    Ok(())
}



//! CLI command implementations.

pub mod cache;
pub mod queue;
pub mod status;

use std::path::Path;
use std::sync::Arc;
use tallysync_storage::{FileStore, KeyValueStore};

/// Opens the data directory at `path`.
///
/// Commands that only read refuse to create a missing directory.
pub(crate) fn open_store(
    path: &Path,
    create: bool,
) -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error>> {
    if !create && !path.is_dir() {
        return Err(format!("No data directory found at {:?}", path).into());
    }
    Ok(Arc::new(FileStore::open(path)?))
}

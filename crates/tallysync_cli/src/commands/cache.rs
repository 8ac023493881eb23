//! Report cache commands.

use super::open_store;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tallysync_engine::{SyncConfig, SystemClock, TtlCache};

fn open_cache(path: &Path) -> Result<TtlCache, Box<dyn std::error::Error>> {
    let store = open_store(path, false)?;
    Ok(TtlCache::with_prefix(
        store,
        Arc::new(SystemClock),
        SyncConfig::default().cache_prefix,
    ))
}

/// Returns the cached value for `key`, evicting it if expired.
pub fn get(path: &Path, key: &str) -> Result<Option<Value>, Box<dyn std::error::Error>> {
    Ok(open_cache(path)?.get(key))
}

/// Returns every cache key, live or expired.
pub fn keys(path: &Path) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut keys = open_cache(path)?.keys()?;
    keys.sort();
    Ok(keys)
}

/// Deletes every cache entry. Returns how many were removed.
pub fn clear(path: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    Ok(open_cache(path)?.clear()?)
}

/// Deletes expired entries. Returns how many were removed.
pub fn purge(path: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    Ok(open_cache(path)?.purge_expired()?)
}



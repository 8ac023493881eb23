//! Time-bounded cache over the key-value store.
//!
//! Entries live under `<prefix><key>` as `{"data", "timestamp", "expiresAt"}`.
//! Reads never fail: a storage or decode error is reported as a miss.

use crate::clock::Clock;
use crate::error::SyncResult;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tallysync_storage::KeyValueStore;
use tracing::{debug, warn};

/// Default key prefix of the report cache.
pub const REPORT_CACHE_PREFIX: &str = "report_cache_";

/// A stored cache entry.
///
/// # Invariants
///
/// - `expires_at = created_at + ttl`
/// - The entry is never returned once `now > expires_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Cached value.
    pub data: Value,
    /// Write time in milliseconds since the epoch.
    #[serde(rename = "timestamp")]
    pub created_at: u64,
    /// Expiry time in milliseconds since the epoch.
    pub expires_at: u64,
}

impl CacheEntry {
    /// Returns true if the entry must no longer be served at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// TTL cache persisted in a [`KeyValueStore`].
pub struct TtlCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
    write_lock: Mutex<()>,
}

impl TtlCache {
    /// Creates a cache using [`REPORT_CACHE_PREFIX`].
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_prefix(store, clock, REPORT_CACHE_PREFIX)
    }

    /// Creates a cache whose entries live under `prefix`.
    pub fn with_prefix(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            prefix: prefix.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Stores `data` for `ttl`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, data: &T, ttl: Duration) -> SyncResult<()> {
        let now = self.clock.now_millis();
        let entry = CacheEntry {
            data: serde_json::to_value(data)?,
            created_at: now,
            expires_at: now.saturating_add(ttl.as_millis() as u64),
        };
        let bytes = serde_json::to_vec(&entry)?;

        let _guard = self.write_lock.lock();
        self.store.put(&self.storage_key(key), &bytes)?;
        Ok(())
    }

    /// Returns the live entry for `key`, evicting it if expired.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let storage_key = self.storage_key(key);
        let entry = self.read(&storage_key)?;
        let now = self.clock.now_millis();
        if entry.is_expired(now) {
            debug!(key, expires_at = entry.expires_at, now, "cache entry expired");
            self.evict_if_expired(&storage_key, now);
            return None;
        }
        Some(entry)
    }

    /// Returns the value for `key` if present and not expired.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.entry(key)?;
        match serde_json::from_value(entry.data) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "cached value has an unexpected shape");
                None
            }
        }
    }

    /// Returns the cached value, or computes, stores and returns it.
    ///
    /// A fetch error is returned as is and nothing is stored. A failure to
    /// store a fetched value is logged and the value is still returned.
    pub fn get_or_fetch<T, E, F>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(hit) = self.get(key) {
            debug!(key, "cache hit");
            return Ok(hit);
        }

        let value = fetch()?;
        if let Err(e) = self.set(key, &value, ttl) {
            warn!(key, error = %e, "failed to cache fetched value");
        }
        Ok(value)
    }

    /// Removes one entry.
    pub fn delete(&self, key: &str) -> SyncResult<()> {
        let _guard = self.write_lock.lock();
        self.store.remove(&self.storage_key(key))?;
        Ok(())
    }

    /// Removes every entry under this cache's prefix. Returns how many.
    pub fn clear(&self) -> SyncResult<usize> {
        let _guard = self.write_lock.lock();
        let keys = self.store.keys_with_prefix(&self.prefix)?;
        for key in &keys {
            self.store.remove(key)?;
        }
        Ok(keys.len())
    }

    /// Removes every expired entry. Returns how many.
    ///
    /// Entries that cannot be decoded are left in place.
    pub fn purge_expired(&self) -> SyncResult<usize> {
        let now = self.clock.now_millis();
        let _guard = self.write_lock.lock();
        let mut purged = 0;
        for key in self.store.keys_with_prefix(&self.prefix)? {
            if self.read(&key).is_some_and(|entry| entry.is_expired(now)) {
                self.store.remove(&key)?;
                purged += 1;
            }
        }
        if purged > 0 {
            debug!(purged, "purged expired cache entries");
        }
        Ok(purged)
    }

    /// Returns the keys (without prefix) currently stored, live or not.
    pub fn keys(&self) -> SyncResult<Vec<String>> {
        Ok(self
            .store
            .keys_with_prefix(&self.prefix)?
            .into_iter()
            .map(|k| k[self.prefix.len()..].to_string())
            .collect())
    }

    fn read(&self, storage_key: &str) -> Option<CacheEntry> {
        let bytes = match self.store.get(storage_key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = storage_key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = storage_key, error = %e, "corrupt cache entry, treating as miss");
                None
            }
        }
    }

    /// Removes the entry unless a concurrent `set` has refreshed it.
    fn evict_if_expired(&self, storage_key: &str, now: u64) {
        let _guard = self.write_lock.lock();
        if !self.read(storage_key).is_some_and(|entry| entry.is_expired(now)) {
            return;
        }
        if let Err(e) = self.store.remove(storage_key) {
            warn!(key = storage_key, error = %e, "failed to evict expired cache entry");
        }
    }
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}



//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};

/// Maximum length of a storage key in bytes.
pub const MAX_KEY_LEN: usize = 200;

/// A durable key-value store for TallySync.
///
/// Stores are **opaque byte maps**. They provide simple operations for
/// reading, replacing, and removing whole values. The engine owns all format
/// interpretation - stores do not understand operation logs or cache entries.
///
/// # Invariants
///
/// - `put` replaces the whole value atomically
/// - `get` returns exactly the bytes of the last successful `put`
/// - `remove` of an absent key succeeds
/// - After `flush` returns, every previous `put`/`remove` survives process
///   termination
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// Returns `Ok(None)` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails. A failed
    /// write leaves the previous value in place.
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes the value stored under `key`.
    ///
    /// Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Returns all keys currently stored, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys cannot be listed.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Returns all keys starting with `prefix`, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys cannot be listed.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    /// Returns true if a value is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;
}

/// Checks that `key` is a valid storage key.
///
/// Valid keys are non-empty, at most [`MAX_KEY_LEN`] bytes, consist only of
/// ASCII letters, digits, `_`, `-` and `.`, and do not start with `.`.
/// The same rules apply to every store so data can move between backends.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the first rule violated.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.len() > MAX_KEY_LEN {
        Some("key is too long")
    } else if key.starts_with('.') {
        Some("key starts with '.'")
    } else if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        Some("key contains characters outside [A-Za-z0-9_.-]")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}



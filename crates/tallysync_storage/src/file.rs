//! File-based key-value store for persistent storage.
//!
//! Layout of a store directory:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                    # Advisory lock for single-writer
//! ├─ taxOperationQueue.kv    # One file per key
//! ├─ syncStatus.kv
//! └─ <key>.kv.tmp            # Transient, only during a write
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, KeyValueStore};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const VALUE_EXT: &str = ".kv";
const TEMP_EXT: &str = ".kv.tmp";

/// A file-based key-value store.
///
/// Each key is stored in its own file inside the store directory. Values
/// survive process restarts.
///
/// # Durability
///
/// `put` writes the value to a temporary file, calls `File::sync_all()`,
/// renames it over the previous value and fsyncs the directory, so a crash
/// leaves either the old or the new value on disk.
///
/// # Exclusive Access
///
/// The store holds an exclusive advisory lock on `LOCK` for its lifetime.
/// Opening the same directory twice fails with [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use tallysync_storage::{KeyValueStore, FileStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("sync-data")).unwrap();
/// store.put("syncStatus", br#"{"lastSync":0}"#).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    /// Serializes writers within this process.
    write_lock: Mutex<()>,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store in the given directory.
    ///
    /// Leftover temporary files from an interrupted write are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists and is not a directory
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(StorageError::InvalidLocation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: path.display().to_string(),
            });
        }

        let store = Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        };
        store.remove_temp_files()?;
        Ok(store)
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{key}{VALUE_EXT}"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{key}{TEMP_EXT}"))
    }

    fn remove_temp_files(&self) -> StorageResult<()> {
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(TEMP_EXT) {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Syncs the store directory so renames and deletions are durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();

        let temp_path = self.temp_path(key);
        let mut file = File::create(&temp_path)?;
        file.write_all(value)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.value_path(key))?;
        self.sync_directory()
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();

        match fs::remove_file(self.value_path(key)) {
            Ok(()) => self.sync_directory(),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(TEMP_EXT) {
                continue;
            }
            if let Some(key) = name.strip_suffix(VALUE_EXT) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn flush(&self) -> StorageResult<()> {
        // Every put is already synced; make sure the directory is too
        let _guard = self.write_lock.lock();
        self.sync_directory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        let store = FileStore::open(&path).unwrap();
        assert!(store.keys().unwrap().is_empty());
        assert!(path.join(LOCK_FILE).exists());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn file_put_and_get() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("taxOperationQueue", b"[]").unwrap();
        assert_eq!(
            store.get("taxOperationQueue").unwrap(),
            Some(b"[]".to_vec())
        );
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn file_put_replaces_value() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("key", b"a much longer first value").unwrap();
        store.put("key", b"short").unwrap();
        assert_eq!(store.get("key").unwrap(), Some(b"short".to_vec()));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put("syncStatus", br#"{"lastSync":1}"#).unwrap();
            store.flush().unwrap();
        }

        {
            let store = FileStore::open(dir.path()).unwrap();
            assert_eq!(
                store.get("syncStatus").unwrap(),
                Some(br#"{"lastSync":1}"#.to_vec())
            );
        }
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _store = FileStore::open(dir.path()).unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn file_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("key", b"value").unwrap();
        store.remove("key").unwrap();
        store.remove("key").unwrap();
        assert_eq!(store.get("key").unwrap(), None);
    }

    #[test]
    fn file_keys_skip_lock_and_temp_files() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("report_cache_b", b"2").unwrap();
        store.put("report_cache_a", b"1").unwrap();
        fs::write(dir.path().join("stray.kv.tmp"), b"partial").unwrap();

        assert_eq!(
            store.keys().unwrap(),
            vec!["report_cache_a".to_string(), "report_cache_b".to_string()]
        );
    }

    #[test]
    fn file_open_cleans_interrupted_writes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("syncStatus.kv.tmp"), b"partial").unwrap();

        let _store = FileStore::open(dir.path()).unwrap();
        assert!(!dir.path().join("syncStatus.kv.tmp").exists());
    }

    #[test]
    fn file_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let result = store.put("../outside", b"x");
        assert!(matches!(result, Err(StorageError::InvalidKey { .. })));
    }

    #[test]
    fn file_open_on_regular_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not_a_dir");
        fs::write(&path, b"x").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(StorageError::InvalidLocation(_))));
    }
}

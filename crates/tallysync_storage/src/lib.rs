//! # TallySync Storage
//!
//! Key-value storage trait and implementations for TallySync.
//!
//! This crate provides the lowest-level persistence abstraction used by the
//! sync engine. Stores are **opaque key-value maps** - they do not interpret
//! the bytes they hold. The engine owns every format (the operation log JSON,
//! cache entries, sync metadata).
//!
//! ## Design Principles
//!
//! - Stores are simple maps (get, put, remove, keys)
//! - `put` replaces a value atomically: readers see the old or the new value,
//!   never a torn write
//! - Must be `Send + Sync` for concurrent access
//! - Keys are restricted to a portable character set (see [`validate_key`])
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - For persistent storage, one file per key
//!
//! ## Example
//!
//! ```rust
//! use tallysync_storage::{KeyValueStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! store.put("greeting", b"hello world").unwrap();
//! assert_eq!(store.get("greeting").unwrap(), Some(b"hello world".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{validate_key, KeyValueStore, MAX_KEY_LEN};

//! Durable FIFO log of operations queued while offline.
//!
//! The whole log is one JSON array stored under a single key and rewritten
//! after every mutation, so a restart never loses queued work.

use crate::clock::Clock;
use crate::config::OverflowPolicy;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tallysync_protocol::{Operation, OperationKind, OperationStatus};
use tallysync_storage::KeyValueStore;
use tracing::{debug, info, warn};

/// Storage key of the operation log.
pub const OPERATION_LOG_KEY: &str = "taxOperationQueue";

/// Durable, bounded FIFO of pending operations.
///
/// # Invariants
///
/// - Operations are kept in enqueue order
/// - The log never holds more than `capacity` operations
/// - Every mutation is persisted before the call returns
pub struct OperationLog {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    overflow: OverflowPolicy,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl OperationLog {
    /// Opens the log stored in `store`.
    ///
    /// Operations left `InFlight` by a previous process are reset to
    /// `Pending`.
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        capacity: usize,
        overflow: OverflowPolicy,
    ) -> SyncResult<Self> {
        let log = Self {
            store,
            clock,
            capacity: capacity.max(1),
            overflow,
            write_lock: Mutex::new(()),
        };

        let recovered = log.update(|ops| {
            let mut count = 0;
            for op in ops.iter_mut().filter(|op| op.status == OperationStatus::InFlight) {
                op.status = OperationStatus::Pending;
                count += 1;
            }
            Ok(count)
        })?;
        if recovered > 0 {
            info!(recovered, "reset interrupted operations to pending");
        }

        Ok(log)
    }

    /// Reads the log stored in `store` without opening it.
    ///
    /// No recovery runs, so the store is left exactly as found.
    pub fn snapshot(store: &dyn KeyValueStore) -> SyncResult<Vec<Operation>> {
        match store.get(OPERATION_LOG_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Validates `kind` and appends a new pending operation.
    ///
    /// A validation failure stores nothing.
    pub fn enqueue(&self, kind: OperationKind) -> SyncResult<Operation> {
        kind.validate()?;
        self.append(Operation::new(kind, self.clock.now_millis()))
    }

    /// Appends an operation that has already been validated.
    pub(crate) fn append(&self, op: Operation) -> SyncResult<Operation> {
        let capacity = self.capacity;
        let overflow = self.overflow;
        let queued = op.clone();
        self.update(move |ops| {
            while ops.len() >= capacity {
                if overflow == OverflowPolicy::Reject {
                    return Err(SyncError::QueueFull { capacity });
                }
                let evicted = ops.remove(0);
                warn!(
                    id = %evicted.id,
                    kind = evicted.kind.name(),
                    capacity,
                    "operation log full, evicted oldest operation"
                );
            }
            ops.push(queued);
            Ok(())
        })?;

        debug!(id = %op.id, kind = op.kind.name(), "operation enqueued");
        Ok(op)
    }

    /// Returns every operation in the log, oldest first.
    pub fn list_pending(&self) -> SyncResult<Vec<Operation>> {
        self.load()
    }

    /// Returns the operation with the given ID.
    pub fn get(&self, id: &str) -> SyncResult<Option<Operation>> {
        Ok(self.load()?.into_iter().find(|op| op.id == id))
    }

    /// Returns operations that will not be attempted again.
    pub fn list_exhausted(&self, max_retries: u32) -> SyncResult<Vec<Operation>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|op| op.is_exhausted(max_retries))
            .collect())
    }

    /// Removes an operation. Returns false if it was not in the log.
    pub fn remove(&self, id: &str) -> SyncResult<bool> {
        self.update(|ops| {
            let before = ops.len();
            ops.retain(|op| op.id != id);
            Ok(ops.len() != before)
        })
    }

    /// Removes an operation only if its last attempt failed.
    ///
    /// Used to drop a terminally failed operation once it has been surfaced.
    pub fn discard(&self, id: &str) -> SyncResult<bool> {
        self.update(|ops| {
            let before = ops.len();
            ops.retain(|op| op.id != id || op.status != OperationStatus::Failed);
            Ok(ops.len() != before)
        })
    }

    /// Marks an operation as being dispatched.
    pub fn mark_in_flight(&self, id: &str) -> SyncResult<Option<Operation>> {
        let now = self.clock.now_millis();
        self.modify(id, |op| op.mark_in_flight(now))
    }

    /// Records a failed attempt: bumps the retry count and sets `Failed`.
    pub fn mark_failed(&self, id: &str, error: &str) -> SyncResult<Option<Operation>> {
        let now = self.clock.now_millis();
        self.modify(id, |op| op.record_failure(now, error))
    }

    /// Records a failure no retry can fix, exhausting the operation.
    pub fn mark_rejected(
        &self,
        id: &str,
        error: &str,
        max_retries: u32,
    ) -> SyncResult<Option<Operation>> {
        let now = self.clock.now_millis();
        self.modify(id, |op| op.record_rejection(now, error, max_retries))
    }

    /// Returns the number of operations in the log.
    pub fn len(&self) -> SyncResult<usize> {
        Ok(self.load()?.len())
    }

    /// Returns true if the log holds no operations.
    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every operation.
    pub fn clear(&self) -> SyncResult<()> {
        let _guard = self.write_lock.lock();
        self.store.remove(OPERATION_LOG_KEY)?;
        Ok(())
    }

    fn modify(
        &self,
        id: &str,
        f: impl FnOnce(&mut Operation),
    ) -> SyncResult<Option<Operation>> {
        self.update(|ops| {
            Ok(ops.iter_mut().find(|op| op.id == id).map(|op| {
                f(op);
                op.clone()
            }))
        })
    }

    fn load(&self) -> SyncResult<Vec<Operation>> {
        Self::snapshot(self.store.as_ref())
    }

    /// Runs a read-modify-write cycle, persisting only if `f` changed the log.
    fn update<R>(
        &self,
        f: impl FnOnce(&mut Vec<Operation>) -> SyncResult<R>,
    ) -> SyncResult<R> {
        let _guard = self.write_lock.lock();
        let mut ops = self.load()?;
        let before = ops.clone();
        let result = f(&mut ops)?;
        if ops != before {
            let bytes = serde_json::to_vec(&ops)?;
            self.store.put(OPERATION_LOG_KEY, &bytes)?;
        }
        Ok(result)
    }
}

impl std::fmt::Debug for OperationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLog")
            .field("capacity", &self.capacity)
            .field("overflow", &self.overflow)
            .finish_non_exhaustive()
    }
}



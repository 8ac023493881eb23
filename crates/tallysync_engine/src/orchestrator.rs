//! Sync orchestrator state machine.
//!
//! A pass first drains the operation log in FIFO order, then reconciles each
//! configured entity type with the server. Progress is committed as it is
//! made: operations dispatched and entity types merged before a failure stay
//! done.

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::feed::{StatusFeed, Subscription};
use crate::oplog::OperationLog;
use crate::repository::EntityRepository;
use crate::retry::{RetryDecision, RetryScheduler};
use crate::transport::{ApiTransport, HttpClient};
use parking_lot::{Mutex, RwLock};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tallysync_protocol::{merge_sets, EntityType, Operation, SyncMetadata, SyncState, SyncStatus};
use tallysync_storage::KeyValueStore;
use tracing::{debug, error, info, warn};

/// Storage key of the persisted [`SyncMetadata`].
pub const SYNC_METADATA_KEY: &str = "syncStatus";

/// Statistics about sync passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that completed.
    pub passes_completed: u64,
    /// Passes that ended in error.
    pub passes_failed: u64,
    /// Operations delivered to the server.
    pub operations_dispatched: u64,
    /// Operations the server rejected as invalid.
    pub operations_rejected: u64,
    /// Entities present on both sides with differing versions.
    pub conflicts_resolved: u64,
    /// Entities pushed after winning a merge.
    pub entities_pushed: u64,
    /// Error of the last failed pass.
    pub last_error: Option<String>,
}

/// Merge counts for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeReport {
    /// Entity type.
    pub entity_type: EntityType,
    /// IDs where the local version was kept.
    pub kept_local: usize,
    /// IDs where the server version was kept.
    pub taken_from_server: usize,
    /// IDs present on both sides with differing versions.
    pub conflicts: usize,
    /// Entities pushed to the server.
    pub pushed: usize,
}

/// Result of a completed pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// IDs of operations delivered and removed from the log.
    pub dispatched: Vec<String>,
    /// Operations the server rejected during this pass.
    pub rejected: Vec<Operation>,
    /// Operations that will not be attempted again.
    pub exhausted: Vec<Operation>,
    /// Operations skipped because their backoff has not elapsed.
    pub deferred: usize,
    /// Per-type merge counts, in processing order.
    pub entity_types: Vec<EntityTypeReport>,
    /// Completion time in milliseconds since the epoch.
    pub completed_at: u64,
    /// Wall time the pass took.
    pub duration: Duration,
}

/// What a call to [`SyncOrchestrator::sync`] did.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// A pass ran to completion.
    Completed(SyncReport),
    /// Another pass is running; nothing was done.
    AlreadySyncing(SyncStatus),
    /// The backend is unreachable; nothing was done.
    Offline,
}

impl SyncOutcome {
    /// Returns the report of a completed pass.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Returns the state to `Idle` when a pass ends, including by panic.
struct PassGuard<'a> {
    status: &'a Mutex<SyncStatus>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        let mut status = self.status.lock();
        *status = SyncStatus::idle(status.last_sync);
    }
}

/// Drives sync passes and publishes their status.
///
/// # Invariants
///
/// - At most one pass runs at a time
/// - The state is `Idle` whenever no pass is running
pub struct SyncOrchestrator<C: HttpClient, R: EntityRepository> {
    config: SyncConfig,
    transport: ApiTransport<C>,
    repository: R,
    oplog: Arc<OperationLog>,
    retry: RetryScheduler,
    connectivity: Arc<ConnectivityMonitor>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    feed: StatusFeed,
    status: Mutex<SyncStatus>,
    stats: RwLock<SyncStats>,
}

impl<C: HttpClient, R: EntityRepository> SyncOrchestrator<C, R> {
    /// Creates an orchestrator.
    ///
    /// The last successful sync time is restored from `store`.
    pub fn new(
        config: SyncConfig,
        client: C,
        repository: R,
        oplog: Arc<OperationLog>,
        connectivity: Arc<ConnectivityMonitor>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let transport = ApiTransport::new(client, config.base_path.clone(), config.request_timeout);
        let retry = RetryScheduler::new(config.retry.clone());
        let orchestrator = Self {
            config,
            transport,
            repository,
            oplog,
            retry,
            connectivity,
            store,
            clock,
            feed: StatusFeed::new(),
            status: Mutex::new(SyncStatus::default()),
            stats: RwLock::new(SyncStats::default()),
        };

        let last_sync = orchestrator.metadata()?.map(|meta| meta.last_sync);
        *orchestrator.status.lock() = SyncStatus::idle(last_sync);
        Ok(orchestrator)
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        self.status.lock().clone()
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        self.status.lock().status
    }

    /// Returns the time of the last successful pass.
    pub fn last_sync(&self) -> Option<u64> {
        self.status.lock().last_sync
    }

    /// Returns the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Registers a callback run on every status transition.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.feed.subscribe(callback)
    }

    /// Returns a receiver of every future status transition.
    pub fn subscribe_channel(&self) -> Receiver<SyncStatus> {
        self.feed.subscribe_channel()
    }

    /// Returns the typed transport.
    pub fn transport(&self) -> &ApiTransport<C> {
        &self.transport
    }

    /// Returns the entity repository.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Returns the operation log.
    pub fn oplog(&self) -> &Arc<OperationLog> {
        &self.oplog
    }

    /// Returns the retry scheduler.
    pub fn retry(&self) -> &RetryScheduler {
        &self.retry
    }

    /// Returns the persisted metadata of the last successful pass.
    pub fn metadata(&self) -> SyncResult<Option<SyncMetadata>> {
        match self.store.get(SYNC_METADATA_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Forgets the last sync time and stats.
    ///
    /// Does nothing while a pass is running.
    pub fn reset(&self) -> SyncResult<()> {
        let mut status = self.status.lock();
        if !status.status.can_start_sync() {
            return Ok(());
        }
        self.store.remove(SYNC_METADATA_KEY)?;
        *status = SyncStatus::idle(None);
        *self.stats.write() = SyncStats::default();
        Ok(())
    }

    /// Runs one sync pass.
    ///
    /// Returns without network activity if a pass is already running or the
    /// backend is offline. A failed pass returns its error after publishing
    /// an `Error` status; the state is `Idle` again either way.
    pub fn sync(&self) -> SyncResult<SyncOutcome> {
        let last_sync = {
            let mut status = self.status.lock();
            if !status.status.can_start_sync() {
                debug!(state = ?status.status, "sync already in progress");
                return Ok(SyncOutcome::AlreadySyncing(status.clone()));
            }
            if !self.connectivity.is_online() {
                debug!("offline, skipping sync pass");
                return Ok(SyncOutcome::Offline);
            }
            *status = SyncStatus::syncing(status.last_sync);
            status.last_sync
        };
        let _guard = PassGuard {
            status: &self.status,
        };

        info!("sync pass started");
        self.feed.emit(&SyncStatus::syncing(last_sync));
        let start = Instant::now();

        match self.run_pass() {
            Ok(mut report) => {
                let now = self.clock.now_millis();
                report.completed_at = now;
                report.duration = start.elapsed();
                if let Err(e) = self.save_metadata(now) {
                    warn!(error = %e, "failed to persist sync metadata");
                }

                let completed = SyncStatus::completed(now);
                *self.status.lock() = completed.clone();
                {
                    let mut stats = self.stats.write();
                    stats.passes_completed += 1;
                    stats.last_error = None;
                }
                info!(
                    dispatched = report.dispatched.len(),
                    rejected = report.rejected.len(),
                    exhausted = report.exhausted.len(),
                    deferred = report.deferred,
                    duration_ms = report.duration.as_millis() as u64,
                    "sync pass completed"
                );
                self.feed.emit(&completed);
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) => {
                let failed = SyncStatus::error(e.to_string(), last_sync);
                *self.status.lock() = failed.clone();
                {
                    let mut stats = self.stats.write();
                    stats.passes_failed += 1;
                    stats.last_error = Some(e.to_string());
                }
                error!(error = %e, "sync pass failed");
                self.feed.emit(&failed);
                Err(e)
            }
        }
    }

    fn run_pass(&self) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        self.drain_operations(&mut report)?;
        for &entity_type in &self.config.entity_types {
            let merged = self.reconcile(entity_type)?;
            report.entity_types.push(merged);
        }
        Ok(report)
    }

    /// Dispatches due operations, oldest first.
    fn drain_operations(&self, report: &mut SyncReport) -> SyncResult<()> {
        let max_retries = self.retry.config().max_retries;

        for op in self.oplog.list_pending()? {
            if op.is_exhausted(max_retries) {
                report.exhausted.push(op);
                continue;
            }
            if !self.retry.is_due(&op, self.clock.now_millis()) {
                debug!(id = %op.id, retry_count = op.retry_count, "operation still backing off");
                report.deferred += 1;
                continue;
            }
            if op.kind.is_malformed() {
                let message = op.kind.validate().err().map(|e| e.to_string()).unwrap_or_default();
                let rejected = self.oplog.mark_rejected(&op.id, &message, max_retries)?;
                warn!(
                    id = %op.id,
                    kind = op.kind.name(),
                    error = %message,
                    "stored operation is malformed"
                );
                self.stats.write().operations_rejected += 1;
                report.rejected.push(rejected.unwrap_or(op));
                continue;
            }
            if !op.kind.is_known() {
                let err = SyncError::UnknownOperation(op.kind.name().to_string());
                self.oplog.mark_rejected(&op.id, &err.to_string(), max_retries)?;
                error!(id = %op.id, kind = op.kind.name(), "cannot dispatch unknown operation");
                return Err(err);
            }
            self.dispatch_queued(op, report)?;
        }
        Ok(())
    }

    fn dispatch_queued(&self, op: Operation, report: &mut SyncReport) -> SyncResult<()> {
        self.oplog.mark_in_flight(&op.id)?;

        let err = match self.transport.dispatch(&op) {
            Ok(_) => {
                self.oplog.remove(&op.id)?;
                debug!(id = %op.id, kind = op.kind.name(), "operation dispatched");
                self.stats.write().operations_dispatched += 1;
                report.dispatched.push(op.id);
                return Ok(());
            }
            Err(e) => e,
        };

        let max_retries = self.retry.config().max_retries;
        let message = err.to_string();
        let mut attempted = op.clone();
        attempted.record_failure(self.clock.now_millis(), message.as_str());

        match self.retry.decide(&attempted, &err) {
            RetryDecision::Reject => {
                let rejected = self
                    .oplog
                    .mark_rejected(&op.id, &message, max_retries)?
                    .unwrap_or(attempted);
                warn!(id = %op.id, kind = op.kind.name(), error = %err, "operation rejected");
                self.stats.write().operations_rejected += 1;
                report.rejected.push(rejected);
                Ok(())
            }
            RetryDecision::Retry { delay } => {
                self.oplog.mark_failed(&op.id, &message)?;
                warn!(
                    id = %op.id,
                    kind = op.kind.name(),
                    retry_count = attempted.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, will retry"
                );
                Err(err)
            }
            RetryDecision::GiveUp => {
                self.oplog.mark_failed(&op.id, &message)?;
                warn!(
                    id = %op.id,
                    kind = op.kind.name(),
                    retry_count = attempted.retry_count,
                    error = %err,
                    "operation failed, retries exhausted"
                );
                Err(err)
            }
        }
    }

    /// Merges the local and server sets of one type and pushes local wins.
    fn reconcile(&self, entity_type: EntityType) -> SyncResult<EntityTypeReport> {
        let local = self.repository.load(entity_type)?;
        let server = self.transport.fetch_entities(entity_type)?;
        let merged = merge_sets(local, server, self.config.conflict_policy);

        self.repository.replace(entity_type, &merged.entities)?;
        if !merged.to_push.is_empty() {
            self.transport.push_entities(entity_type, &merged.to_push)?;
        }

        {
            let mut stats = self.stats.write();
            stats.conflicts_resolved += merged.conflicts as u64;
            stats.entities_pushed += merged.to_push.len() as u64;
        }
        debug!(
            %entity_type,
            kept_local = merged.kept_local,
            taken_from_server = merged.taken_from_server,
            conflicts = merged.conflicts,
            pushed = merged.to_push.len(),
            "entity type reconciled"
        );

        Ok(EntityTypeReport {
            entity_type,
            kept_local: merged.kept_local,
            taken_from_server: merged.taken_from_server,
            conflicts: merged.conflicts,
            pushed: merged.to_push.len(),
        })
    }

    fn save_metadata(&self, last_sync: u64) -> SyncResult<()> {
        let metadata = SyncMetadata {
            last_sync,
            platform: self.config.platform.clone(),
            version: self.config.app_version.clone(),
        };
        let bytes = serde_json::to_vec(&metadata)?;
        self.store.put(SYNC_METADATA_KEY, &bytes)?;
        Ok(())
    }
}

impl<C: HttpClient, R: EntityRepository> std::fmt::Debug for SyncOrchestrator<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("status", &self.status())
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}



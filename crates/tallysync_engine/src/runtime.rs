//! Wiring of the sync subsystem.
//!
//! A [`SyncRuntime`] is built explicitly from a configuration, a store, an
//! HTTP client and an entity repository. Nothing is global; tests build as
//! many runtimes as they like and tear them down with [`SyncRuntime::reset`].

use crate::cache::TtlCache;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::feed::Subscription;
use crate::oplog::OperationLog;
use crate::orchestrator::{SyncOrchestrator, SyncOutcome};
use crate::repository::EntityRepository;
use crate::scheduler::SchedulerHandle;
use crate::transport::HttpClient;
use serde_json::Value;
use std::sync::Arc;
use tallysync_protocol::{GenerateReport, Operation, OperationKind, SyncStatus};
use tallysync_storage::KeyValueStore;
use tracing::{debug, warn};

/// Result of [`SyncRuntime::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Delivered immediately.
    Sent {
        /// ID the operation was sent with.
        operation_id: String,
        /// Response data.
        response: Value,
    },
    /// Stored in the operation log for a later pass.
    Queued(Operation),
}

/// The assembled sync subsystem.
pub struct SyncRuntime<C, R>
where
    C: HttpClient + 'static,
    R: EntityRepository + 'static,
{
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    oplog: Arc<OperationLog>,
    cache: TtlCache,
    connectivity: Arc<ConnectivityMonitor>,
    orchestrator: Arc<SyncOrchestrator<C, R>>,
}

impl<C, R> SyncRuntime<C, R>
where
    C: HttpClient + 'static,
    R: EntityRepository + 'static,
{
    /// Opens the runtime on the system clock, starting online.
    pub fn open(
        config: SyncConfig,
        store: Arc<dyn KeyValueStore>,
        client: C,
        repository: R,
    ) -> SyncResult<Self> {
        Self::open_with_clock(config, store, client, repository, Arc::new(SystemClock))
    }

    /// Opens the runtime with an explicit clock.
    ///
    /// Operations left in flight by a previous process are reset to pending.
    pub fn open_with_clock(
        config: SyncConfig,
        store: Arc<dyn KeyValueStore>,
        client: C,
        repository: R,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let oplog = Arc::new(OperationLog::open(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.queue_capacity,
            config.overflow,
        )?);
        let cache = TtlCache::with_prefix(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.cache_prefix.clone(),
        );
        let connectivity = Arc::new(ConnectivityMonitor::new(true));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            config.clone(),
            client,
            repository,
            Arc::clone(&oplog),
            Arc::clone(&connectivity),
            store,
            Arc::clone(&clock),
        )?);

        Ok(Self {
            config,
            clock,
            oplog,
            cache,
            connectivity,
            orchestrator,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the operation log.
    pub fn oplog(&self) -> &OperationLog {
        &self.oplog
    }

    /// Returns the report cache.
    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// Returns the orchestrator.
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator<C, R>> {
        &self.orchestrator
    }

    /// Returns true if the backend is believed reachable.
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Records connectivity. Returns true on an offline to online
    /// transition; a running scheduler reacts to it with a pass.
    pub fn set_online(&self, online: bool) -> bool {
        self.connectivity.set_online(online)
    }

    /// Queues an operation for the next pass.
    pub fn enqueue(&self, kind: OperationKind) -> SyncResult<Operation> {
        self.oplog.enqueue(kind)
    }

    /// Sends an operation now if online, otherwise queues it.
    ///
    /// A transient failure of the immediate send queues the operation under
    /// the same ID. Validation failures are returned and nothing is queued.
    pub fn submit(&self, kind: OperationKind) -> SyncResult<Submission> {
        kind.validate()?;
        let op = Operation::new(kind, self.clock.now_millis());
        if !self.is_online() {
            return Ok(Submission::Queued(self.oplog.append(op)?));
        }

        match self.orchestrator.transport().dispatch(&op) {
            Ok(response) => {
                debug!(id = %op.id, kind = op.kind.name(), "operation sent");
                Ok(Submission::Sent {
                    operation_id: op.id,
                    response,
                })
            }
            Err(e) if e.is_retryable() => {
                warn!(id = %op.id, error = %e, "send failed, queueing operation");
                Ok(Submission::Queued(self.oplog.append(op)?))
            }
            Err(e) => Err(e),
        }
    }

    /// Runs one sync pass now.
    pub fn sync(&self) -> SyncResult<SyncOutcome> {
        self.orchestrator.sync()
    }

    /// Returns the current sync status.
    pub fn status(&self) -> SyncStatus {
        self.orchestrator.status()
    }

    /// Registers a callback run on every status transition.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.orchestrator.subscribe(callback)
    }

    /// Returns a report, from the cache when a live copy exists.
    ///
    /// Offline with no cached copy fails with [`SyncError::NotConnected`].
    pub fn generate_report(&self, request: &GenerateReport) -> SyncResult<Value> {
        self.cache
            .get_or_fetch(&report_cache_key(request), self.config.report_ttl, || {
                if !self.is_online() {
                    return Err(SyncError::NotConnected);
                }
                self.orchestrator.transport().generate_report(request)
            })
    }

    /// Starts the background scheduler on the current tokio runtime.
    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        SchedulerHandle::spawn(
            Arc::clone(&self.orchestrator),
            self.config.sync_interval,
            self.connectivity.watch(),
        )
    }

    /// Clears queued operations, cached reports and sync metadata.
    pub fn reset(&self) -> SyncResult<()> {
        self.oplog.clear()?;
        self.cache.clear()?;
        self.orchestrator.reset()
    }
}

impl<C, R> std::fmt::Debug for SyncRuntime<C, R>
where
    C: HttpClient + 'static,
    R: EntityRepository + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRuntime")
            .field("online", &self.is_online())
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

/// Cache key of a report request, restricted to storage-safe characters.
pub fn report_cache_key(request: &GenerateReport) -> String {
    let raw = format!(
        "{}_{}",
        request.report_type,
        request.period.as_deref().unwrap_or("all")
    );
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}



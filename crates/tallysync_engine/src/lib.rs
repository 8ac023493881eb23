//! # TallySync Engine
//!
//! Offline-first sync machinery for the TallySync tax client.
//!
//! This crate provides:
//! - A durable, bounded FIFO log of operations queued while offline
//! - Retry with capped exponential backoff
//! - A TTL cache for expensive report calls
//! - A sync orchestrator (idle → syncing → completed/error → idle)
//! - A tokio scheduler triggering passes periodically and on reconnect
//! - An HTTP client abstraction with an in-memory mock backend
//!
//! ## Architecture
//!
//! A sync pass runs in two phases:
//! 1. Drain the operation log, oldest first
//! 2. Reconcile each entity type with the server by last-write-wins, then
//!    push the entities whose local version won
//!
//! ## Key Invariants
//!
//! - At most one pass runs at a time
//! - An operation leaves the log only once the server accepted it, or when
//!   a caller discards it after it failed terminally
//! - The log is persisted after every mutation
//! - Cache reads never fail; storage errors are misses

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod connectivity;
mod error;
mod feed;
mod mock;
mod oplog;
mod orchestrator;
mod repository;
mod retry;
mod runtime;
mod scheduler;
mod transport;

pub use cache::{CacheEntry, TtlCache, REPORT_CACHE_PREFIX};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OverflowPolicy, RetryConfig, SyncConfig};
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use error::{SyncError, SyncResult};
pub use feed::{StatusFeed, Subscription};
pub use mock::{MockClient, RecordedCall};
pub use oplog::{OperationLog, OPERATION_LOG_KEY};
pub use orchestrator::{
    EntityTypeReport, SyncOrchestrator, SyncOutcome, SyncReport, SyncStats, SYNC_METADATA_KEY,
};
pub use repository::{EntityRepository, StoreRepository};
pub use retry::{RetryDecision, RetryScheduler};
pub use runtime::{report_cache_key, Submission, SyncRuntime};
pub use scheduler::{SchedulerHandle, Synchronizer};
pub use transport::{ApiTransport, HttpClient, RequestOptions, TransportError};

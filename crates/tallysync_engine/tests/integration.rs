//! Integration tests for the sync runtime against the in-memory backend.

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tallysync_engine::{
    EntityRepository, HttpClient, ManualClock, MockClient, OperationLog, OverflowPolicy,
    RequestOptions, StoreRepository, SyncConfig, SyncOutcome, SyncRuntime, TransportError,
    TtlCache,
};
use tallysync_protocol::{
    CalculateTax, EntityType, OperationKind, OperationStatus, SyncState, SyncableEntity,
};
use tallysync_storage::{FileStore, InMemoryStore, KeyValueStore};

type MemoryRuntime = SyncRuntime<Arc<MockClient>, StoreRepository>;

struct Fixture {
    runtime: MemoryRuntime,
    server: Arc<MockClient>,
    clock: Arc<ManualClock>,
    store: Arc<InMemoryStore>,
}

fn fixture() -> Fixture {
    fixture_with(SyncConfig::new("test", "1.0.0"))
}

fn fixture_with(config: SyncConfig) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let server = Arc::new(MockClient::new());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let runtime = SyncRuntime::open_with_clock(
        config,
        store.clone(),
        server.clone(),
        StoreRepository::new(store.clone()),
        clock.clone(),
    )
    .unwrap();
    Fixture {
        runtime,
        server,
        clock,
        store,
    }
}

fn calc(income: f64) -> OperationKind {
    OperationKind::CalculateTax(CalculateTax::new(income))
}

#[test]
fn offline_operation_is_delivered_after_reconnect() {
    let f = fixture();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = f.runtime.subscribe(move |status| sink.lock().push(status.clone()));

    f.runtime.set_online(false);
    f.runtime.enqueue(calc(1000.0)).unwrap();
    assert_eq!(f.runtime.oplog().list_pending().unwrap().len(), 1);
    assert!(matches!(f.runtime.sync().unwrap(), SyncOutcome::Offline));

    assert!(f.runtime.set_online(true));
    f.runtime.sync().unwrap();

    assert!(f.runtime.oplog().list_pending().unwrap().is_empty());
    let delivered = f.server.operations();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, "calculate-tax");
    assert_eq!(delivered[0].payload["income"], json!(1000.0));

    let states: Vec<SyncState> = seen.lock().iter().map(|s| s.status).collect();
    assert_eq!(states, vec![SyncState::Syncing, SyncState::Completed]);
    assert_eq!(seen.lock()[1].last_sync, Some(1_700_000_000_000));
    assert_eq!(f.runtime.status().status, SyncState::Idle);
}

#[test]
fn unknown_operation_fails_the_pass() {
    let f = fixture();
    let kind = OperationKind::from_parts("unknownOperation", json!({"x": 1})).unwrap();
    f.runtime.enqueue(kind).unwrap();
    let rx = f.runtime.orchestrator().subscribe_channel();

    let err = f.runtime.sync().unwrap_err();
    assert!(err.to_string().contains("Unknown operation: unknownOperation"));

    let last = rx.try_iter().last().unwrap();
    assert_eq!(last.status, SyncState::Error);
    assert!(last.error.unwrap().contains("Unknown operation: unknownOperation"));
    assert_eq!(f.runtime.status().status, SyncState::Idle);
}

#[test]
fn expired_cache_entry_is_deleted_on_read() {
    let f = fixture();
    f.runtime.cache().set("k", &json!({"a": 1}), Duration::from_secs(1)).unwrap();

    f.clock.advance(Duration::from_secs(2));
    assert_eq!(f.runtime.cache().get::<Value>("k"), None);
    assert!(!f.store.contains("report_cache_k").unwrap());
}

#[test]
fn cache_ttl_boundary() {
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(0));
    let cache = TtlCache::new(store, clock.clone());
    cache.set("summary", &json!({"total": 10}), Duration::from_secs(60)).unwrap();
    let expires_at = cache.entry("summary").unwrap().expires_at;

    clock.set(expires_at - 1_000);
    assert!(cache.get::<Value>("summary").is_some());
    clock.set(expires_at + 1_000);
    assert!(cache.get::<Value>("summary").is_none());
}

#[test]
fn newer_server_version_replaces_local() {
    let f = fixture_with(SyncConfig::new("test", "1.0.0").with_entity_types([EntityType::Expenses]));
    let repo = StoreRepository::new(f.store.clone());
    repo.upsert(
        EntityType::Expenses,
        SyncableEntity::new(1u64, 1_000).with_field("amount", 100),
    )
    .unwrap();
    f.server.insert_entity(
        EntityType::Expenses,
        SyncableEntity::new(1u64, 2_000).with_field("amount", 150),
    );

    f.runtime.sync().unwrap();

    let local = repo.load(EntityType::Expenses).unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].field("amount"), Some(&json!(150)));
    assert_eq!(local[0].last_modified, 2_000);
    // Nothing to push when the server wins
    assert!(f
        .server
        .calls()
        .iter()
        .all(|call| call.path != "/expenses/sync"));
}

#[test]
fn local_only_entities_are_pushed() {
    let f = fixture_with(SyncConfig::new("test", "1.0.0").with_entity_types([EntityType::Mileage]));
    let repo = StoreRepository::new(f.store.clone());
    repo.upsert(
        EntityType::Mileage,
        SyncableEntity::new("trip-9", 5).with_field("miles", 42),
    )
    .unwrap();

    let outcome = f.runtime.sync().unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.entity_types[0].pushed, 1);
    assert_eq!(f.server.entities(EntityType::Mileage).len(), 1);
}

/// Holds the first GET until released, to keep a pass in `Syncing`.
struct GatedClient {
    inner: Arc<MockClient>,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl HttpClient for GatedClient {
    fn get(&self, path: &str, options: &RequestOptions) -> Result<Value, TransportError> {
        if let Some(entered) = self.entered.lock().take() {
            entered.send(()).unwrap();
            if let Some(release) = self.release.lock().take() {
                release.recv().unwrap();
            }
        }
        self.inner.get(path, options)
    }

    fn post(
        &self,
        path: &str,
        body: &Value,
        options: &RequestOptions,
    ) -> Result<Value, TransportError> {
        self.inner.post(path, body, options)
    }
}

#[test]
fn concurrent_triggers_run_one_pass() {
    let server = Arc::new(MockClient::new());
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let client = GatedClient {
        inner: server.clone(),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(Some(release_rx)),
    };
    let store = Arc::new(InMemoryStore::new());
    let runtime = Arc::new(
        SyncRuntime::open(
            SyncConfig::new("test", "1.0.0").with_entity_types([EntityType::Expenses]),
            store.clone(),
            client,
            StoreRepository::new(store),
        )
        .unwrap(),
    );

    let background = {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || runtime.sync())
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(runtime.status().status, SyncState::Syncing);

    for _ in 0..2 {
        match runtime.sync().unwrap() {
            SyncOutcome::AlreadySyncing(status) => assert_eq!(status.status, SyncState::Syncing),
            other => panic!("expected AlreadySyncing, got {other:?}"),
        }
    }

    release_tx.send(()).unwrap();
    let outcome = background.join().unwrap().unwrap();
    assert!(matches!(outcome, SyncOutcome::Completed(_)));
    assert_eq!(server.call_count(), 1);
    assert_eq!(runtime.status().status, SyncState::Idle);
}

#[test]
fn failed_pass_returns_to_idle_and_next_pass_runs() {
    let f = fixture();
    f.runtime.enqueue(calc(1.0)).unwrap();
    f.server.set_connected(false);

    assert!(f.runtime.sync().is_err());
    assert_eq!(f.runtime.status().status, SyncState::Idle);
    assert_eq!(f.runtime.oplog().len().unwrap(), 1);

    f.server.set_connected(true);
    f.clock.advance(Duration::from_secs(10));
    assert!(f.runtime.sync().unwrap().report().is_some());
    assert!(f.runtime.oplog().is_empty().unwrap());
}

#[test]
fn exhausted_operations_are_kept_and_reported() {
    let f = fixture_with(SyncConfig::new("test", "1.0.0").with_entity_types(Vec::<EntityType>::new()));
    let op = f.runtime.enqueue(calc(1.0)).unwrap();

    for _ in 0..3 {
        f.server.fail_next(TransportError::Application {
            status: 503,
            message: "maintenance".into(),
        });
        assert!(f.runtime.sync().is_err());
        f.clock.advance(Duration::from_secs(600));
    }

    let report = f.runtime.sync().unwrap().report().cloned().unwrap();
    assert_eq!(report.exhausted.len(), 1);
    assert_eq!(report.exhausted[0].id, op.id);
    assert_eq!(report.exhausted[0].retry_count, 3);
    assert!(f.server.operations().is_empty());

    let exhausted = f.runtime.oplog().list_exhausted(3).unwrap();
    assert_eq!(exhausted.len(), 1);
    assert!(f.runtime.oplog().discard(&op.id).unwrap());
    assert!(f.runtime.oplog().is_empty().unwrap());
}

#[test]
fn queue_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig::new("test", "1.0.0");

    let queued = {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let runtime = SyncRuntime::open(
            config.clone(),
            store.clone(),
            MockClient::new(),
            StoreRepository::new(store),
        )
        .unwrap();
        runtime.set_online(false);
        let op = runtime.enqueue(calc(1000.0)).unwrap();
        runtime.oplog().mark_in_flight(&op.id).unwrap();
        op
    };

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let server = Arc::new(MockClient::new());
    let runtime = SyncRuntime::open(
        config,
        store.clone(),
        server.clone(),
        StoreRepository::new(store),
    )
    .unwrap();

    let pending = runtime.oplog().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, queued.id);
    assert_eq!(pending[0].status, OperationStatus::Pending);

    runtime.sync().unwrap();
    assert_eq!(server.operations()[0].operation_id, queued.id);
    assert!(runtime.oplog().is_empty().unwrap());
}

#[test]
fn concurrent_enqueues_are_all_kept() {
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let log = Arc::new(
        OperationLog::open(store, Arc::new(ManualClock::new(0)), 100, OverflowPolicy::DropOldest)
            .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for i in 0..10 {
                    log.enqueue(calc((t * 10 + i) as f64)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(log.len().unwrap(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_syncs_on_reconnect() {
    let f = fixture_with(SyncConfig::new("test", "1.0.0").with_sync_interval(Duration::from_secs(3600)));
    f.runtime.set_online(false);
    f.runtime.enqueue(calc(500.0)).unwrap();

    let handle = f.runtime.spawn_scheduler();
    // Startup tick happens while offline
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.runtime.oplog().len().unwrap(), 1);

    f.runtime.set_online(true);
    let mut delivered = false;
    for _ in 0..200 {
        if f.runtime.oplog().is_empty().unwrap() {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    assert!(delivered);
    assert_eq!(f.server.operations().len(), 1);
}

proptest! {
    #[test]
    fn log_keeps_newest_operations_in_order(count in 0usize..25, capacity in 1usize..12) {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let log = OperationLog::open(
            store,
            Arc::new(ManualClock::new(0)),
            capacity,
            OverflowPolicy::DropOldest,
        )
        .unwrap();

        let ids: Vec<String> = (0..count)
            .map(|i| log.enqueue(calc(i as f64)).unwrap().id)
            .collect();
        let kept: Vec<String> = log.list_pending().unwrap().into_iter().map(|op| op.id).collect();

        let start = count.saturating_sub(capacity);
        prop_assert_eq!(kept, ids[start..].to_vec());
    }
}

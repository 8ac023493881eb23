//! In-memory backend for tests and demos.

use crate::transport::{HttpClient, RequestOptions, TransportError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tallysync_protocol::{
    ApiEnvelope, EntityId, EntityType, OperationRequest, PushEntitiesRequest,
    PushEntitiesResponse, SyncableEntity,
};

/// A request seen by [`MockClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// `"GET"` or `"POST"`.
    pub method: &'static str,
    /// Request path.
    pub path: String,
    /// Request body, for POSTs.
    pub body: Option<Value>,
}

#[derive(Default)]
struct MockState {
    tables: BTreeMap<EntityType, BTreeMap<EntityId, SyncableEntity>>,
    failures: VecDeque<TransportError>,
    rejected_kinds: HashMap<String, String>,
    latency: Duration,
    calls: Vec<RecordedCall>,
    operations: Vec<OperationRequest>,
    reports: u64,
}

/// A scriptable in-memory tax backend.
///
/// Serves entity tables, accepts operations (dropping replays of an
/// operation ID it already accepted) and records every request. Failures
/// are injected with [`set_connected`](Self::set_connected),
/// [`set_latency`](Self::set_latency), [`fail_next`](Self::fail_next) and
/// [`reject_kind`](Self::reject_kind).
pub struct MockClient {
    connected: AtomicBool,
    state: Mutex<MockState>,
}

impl MockClient {
    /// Creates a connected server with empty tables.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Sets the connected state. A disconnected server fails every request
    /// with [`TransportError::Network`].
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns the connected state.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Sets the simulated response time. Requests whose timeout is shorter
    /// fail with [`TransportError::Timeout`].
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Fails the next request with `error`. Calls queue up.
    pub fn fail_next(&self, error: TransportError) {
        self.state.lock().failures.push_back(error);
    }

    /// Answers operations of `kind` with a 422.
    pub fn reject_kind(&self, kind: impl Into<String>, message: impl Into<String>) {
        self.state
            .lock()
            .rejected_kinds
            .insert(kind.into(), message.into());
    }

    /// Stores an entity in the server's table.
    pub fn insert_entity(&self, entity_type: EntityType, entity: SyncableEntity) {
        self.state
            .lock()
            .tables
            .entry(entity_type)
            .or_default()
            .insert(entity.id.clone(), entity);
    }

    /// Returns the server's entities of one type, sorted by ID.
    pub fn entities(&self, entity_type: EntityType) -> Vec<SyncableEntity> {
        self.state
            .lock()
            .tables
            .get(&entity_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns accepted operations in arrival order.
    pub fn operations(&self) -> Vec<OperationRequest> {
        self.state.lock().operations.clone()
    }

    /// Returns every request seen, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the number of requests seen.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    fn handle(
        &self,
        method: &'static str,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<Value, TransportError> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });

        if !self.is_connected() {
            return Err(TransportError::Network("server unreachable".into()));
        }
        if state.latency > options.timeout {
            return Err(TransportError::Timeout);
        }
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        match (method, body) {
            ("GET", _) => state.get(path),
            ("POST", Some(body)) => state.post(path, body),
            _ => Err(not_found(path)),
        }
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn get(&self, path: &str) -> Result<Value, TransportError> {
        let entity_type = path
            .strip_prefix('/')
            .and_then(EntityType::parse)
            .ok_or_else(|| not_found(path))?;
        let entities: Vec<&SyncableEntity> = self
            .tables
            .get(&entity_type)
            .map(|table| table.values().collect())
            .unwrap_or_default();
        Ok(json!({ "data": entities }))
    }

    fn post(&mut self, path: &str, body: &Value) -> Result<Value, TransportError> {
        if let Some(entity_type) = path
            .strip_prefix('/')
            .and_then(|p| p.strip_suffix("/sync"))
            .and_then(EntityType::parse)
        {
            let request: PushEntitiesRequest = decode(body)?;
            let table = self.tables.entry(entity_type).or_default();
            let accepted = request.entities.len();
            for entity in request.entities {
                table.insert(entity.id.clone(), entity);
            }
            return envelope(PushEntitiesResponse { accepted });
        }

        if body.get("operationId").is_some() {
            let request: OperationRequest = decode(body)?;
            if let Some(message) = self.rejected_kinds.get(&request.kind) {
                return Err(TransportError::Application {
                    status: 422,
                    message: message.clone(),
                });
            }
            let operation_id = request.operation_id.clone();
            if !self.operations.iter().any(|op| op.operation_id == operation_id) {
                self.operations.push(request);
            }
            return Ok(json!({ "data": { "operationId": operation_id, "status": "accepted" } }));
        }

        if path == "/reports/generate" {
            self.reports += 1;
            return Ok(json!({
                "data": {
                    "reportType": body.get("reportType").cloned().unwrap_or(Value::Null),
                    "period": body.get("period").cloned().unwrap_or(Value::Null),
                    "sequence": self.reports,
                }
            }));
        }

        Err(not_found(path))
    }
}

impl HttpClient for MockClient {
    fn get(&self, path: &str, options: &RequestOptions) -> Result<Value, TransportError> {
        self.handle("GET", path, None, options)
    }

    fn post(
        &self,
        path: &str,
        body: &Value,
        options: &RequestOptions,
    ) -> Result<Value, TransportError> {
        self.handle("POST", path, Some(body), options)
    }
}

fn not_found(path: &str) -> TransportError {
    TransportError::Application {
        status: 404,
        message: format!("no route for {path}"),
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &Value) -> Result<T, TransportError> {
    serde_json::from_value(body.clone()).map_err(|e| TransportError::Application {
        status: 400,
        message: e.to_string(),
    })
}

fn envelope<T: serde::Serialize>(data: T) -> Result<Value, TransportError> {
    serde_json::to_value(ApiEnvelope::new(data)).map_err(|e| TransportError::Application {
        status: 500,
        message: e.to_string(),
    })
}



//! JSON bodies exchanged with the backend.
//!
//! Every response is wrapped in a `{"data": ...}` envelope.

use crate::entity::{EntityType, SyncableEntity};
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `{"data": ...}` response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Response payload.
    pub data: T,
}

impl<T> ApiEnvelope<T> {
    /// Wraps a payload.
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Body of an operation dispatch.
///
/// Carries the operation ID so the backend can drop a replayed dispatch whose
/// first attempt succeeded but whose response was lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Operation ID, used as an idempotency key.
    pub operation_id: String,
    /// Kind name.
    pub kind: String,
    /// Kind-specific payload.
    pub payload: Value,
    /// When the operation was queued, in milliseconds since the epoch.
    pub enqueued_at: u64,
}

impl From<&Operation> for OperationRequest {
    fn from(op: &Operation) -> Self {
        Self {
            operation_id: op.id.clone(),
            kind: op.kind.name().to_string(),
            payload: op.kind.payload(),
            enqueued_at: op.enqueued_at,
        }
    }
}

/// Body of an entity push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEntitiesRequest {
    /// Entity type being pushed.
    pub entity_type: EntityType,
    /// Entities whose local version won the merge.
    pub entities: Vec<SyncableEntity>,
}

/// Payload of an entity push response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEntitiesResponse {
    /// Number of entities the server accepted.
    #[serde(default)]
    pub accepted: usize,
}



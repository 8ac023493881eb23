//! # TallySync Protocol
//!
//! Shared data model for the TallySync offline reconciliation engine.
//!
//! This crate provides:
//! - [`Operation`] and the typed [`OperationKind`] union for queued mutations
//! - [`SyncableEntity`] and [`EntityType`] for reconciled domain records
//! - Last-write-wins conflict resolution ([`merge`], [`merge_sets`])
//! - [`SyncStatus`] and [`SyncMetadata`] for status fan-out and persistence
//! - JSON wire envelopes exchanged with the backend
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod error;
mod messages;
mod operation;
mod status;

pub use conflict::{merge, merge_sets, resolve, ConflictPolicy, MergedSet, Resolution, Side};
pub use entity::{EntityId, EntityType, SyncableEntity};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ApiEnvelope, OperationRequest, PushEntitiesRequest, PushEntitiesResponse};
pub use operation::{
    AnalyzeDeductions, CalculateTax, GenerateReport, Operation, OperationKind, OperationStatus,
    SaveForm, StoreDocument, SubmitForm, VerifyField, KNOWN_KINDS,
};
pub use status::{SyncMetadata, SyncState, SyncStatus};

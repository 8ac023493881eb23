//! Syncable domain entities.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier of a syncable entity.
///
/// Backends hand out both numeric and string IDs; both are accepted and
/// written back in the form they arrived in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    /// Numeric ID.
    Number(u64),
    /// String ID.
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{n}"),
            EntityId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        EntityId::Number(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::Text(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId::Text(id)
    }
}

/// A domain record that participates in sync.
///
/// Only `id` and `lastModified` are interpreted; every other field is carried
/// through unchanged.
///
/// # Invariants
///
/// - `last_modified` is assigned by whichever side (local or server) last
///   mutated the record, and only ever moves forward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncableEntity {
    /// Entity ID.
    pub id: EntityId,
    /// Last modification time in milliseconds since the Unix epoch.
    pub last_modified: u64,
    /// Remaining domain fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SyncableEntity {
    /// Creates an entity with no domain fields.
    pub fn new(id: impl Into<EntityId>, last_modified: u64) -> Self {
        Self {
            id: id.into(),
            last_modified,
            fields: Map::new(),
        }
    }

    /// Adds a domain field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a domain field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// The entity collections reconciled during a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    /// Expense records.
    Expenses,
    /// Mileage records.
    Mileage,
    /// Receipt documents.
    Receipts,
    /// Tax operations (forms, calculations).
    TaxOperations,
    /// Data imported from connected platforms.
    PlatformData,
}

impl EntityType {
    /// Every entity type, in the order a pass processes them.
    pub const ALL: [EntityType; 5] = [
        EntityType::Expenses,
        EntityType::Mileage,
        EntityType::Receipts,
        EntityType::TaxOperations,
        EntityType::PlatformData,
    ];

    /// Returns the kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Expenses => "expenses",
            EntityType::Mileage => "mileage",
            EntityType::Receipts => "receipts",
            EntityType::TaxOperations => "tax-operations",
            EntityType::PlatformData => "platform-data",
        }
    }

    /// Parses a kebab-case name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Path the server state of this type is fetched from.
    pub fn fetch_path(&self) -> String {
        format!("/{}", self.as_str())
    }

    /// Path locally-won entities of this type are pushed to.
    pub fn push_path(&self) -> String {
        format!("/{}/sync", self.as_str())
    }

    /// Key under which the local copy of this type is stored.
    pub fn storage_key(&self) -> String {
        format!("entities_{}", self.as_str())
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}



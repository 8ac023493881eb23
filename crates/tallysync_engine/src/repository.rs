//! Local entity storage seen by the orchestrator.

use crate::error::SyncResult;
use std::sync::Arc;
use tallysync_protocol::{EntityType, SyncableEntity};
use tallysync_storage::KeyValueStore;

/// Access to the locally held entities of each type.
///
/// The domain layer owns the entities; the orchestrator only reads and
/// replaces them during a pass.
pub trait EntityRepository: Send + Sync {
    /// Returns every local entity of one type.
    fn load(&self, entity_type: EntityType) -> SyncResult<Vec<SyncableEntity>>;

    /// Replaces the local entities of one type with the merged set.
    fn replace(&self, entity_type: EntityType, entities: &[SyncableEntity]) -> SyncResult<()>;
}

impl<R: EntityRepository + ?Sized> EntityRepository for Arc<R> {
    fn load(&self, entity_type: EntityType) -> SyncResult<Vec<SyncableEntity>> {
        (**self).load(entity_type)
    }

    fn replace(&self, entity_type: EntityType, entities: &[SyncableEntity]) -> SyncResult<()> {
        (**self).replace(entity_type, entities)
    }
}

/// Repository keeping each entity type as a JSON array under
/// `entities_<type>`.
#[derive(Clone)]
pub struct StoreRepository {
    store: Arc<dyn KeyValueStore>,
}

impl StoreRepository {
    /// Creates a repository over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Adds or replaces one local entity.
    pub fn upsert(&self, entity_type: EntityType, entity: SyncableEntity) -> SyncResult<()> {
        let mut entities = self.load(entity_type)?;
        match entities.iter_mut().find(|e| e.id == entity.id) {
            Some(existing) => *existing = entity,
            None => entities.push(entity),
        }
        self.replace(entity_type, &entities)
    }
}

impl EntityRepository for StoreRepository {
    fn load(&self, entity_type: EntityType) -> SyncResult<Vec<SyncableEntity>> {
        match self.store.get(&entity_type.storage_key())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn replace(&self, entity_type: EntityType, entities: &[SyncableEntity]) -> SyncResult<()> {
        let bytes = serde_json::to_vec(entities)?;
        self.store.put(&entity_type.storage_key(), &bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for StoreRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRepository").finish_non_exhaustive()
    }
}



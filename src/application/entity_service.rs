use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::domain::{EntityKind, FinancialEntity};
use crate::storage::{KeyValueStore, StoreError};

use super::sync::{BatchResult, EntitySync, SyncIntent, SyncOutcome};

/// A service owning the in-memory collection of one entity kind.
#[async_trait]
pub trait DomainService: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn get_all(&self) -> Vec<FinancialEntity>;

    /// Replace the whole collection, in memory and on disk.
    async fn bulk_set(&self, entities: Vec<FinancialEntity>) -> Result<(), StoreError>;

    /// Drop the in-memory collection without touching the local store.
    fn clear_cache(&self);
}

/// Local cache of one kind, kept in step with the remote store through an
/// [`EntitySync`]. The cache only changes after the coordinator reports
/// success.
pub struct EntityService {
    kind: EntityKind,
    items: RwLock<Vec<FinancialEntity>>,
    local: Arc<dyn KeyValueStore>,
    sync: Arc<dyn EntitySync>,
}

impl EntityService {
    pub fn new(kind: EntityKind, local: Arc<dyn KeyValueStore>, sync: Arc<dyn EntitySync>) -> Self {
        Self {
            kind,
            items: RwLock::new(Vec::new()),
            local,
            sync,
        }
    }

    /// Populate the cache from the local store. Returns the number loaded.
    /// A collection that cannot be parsed loads as empty; the stored value
    /// stays until the next write or reset replaces it.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let key = self.kind.storage_key();
        let entities: Vec<FinancialEntity> = match self.local.get(&key).await? {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(kind = %self.kind, %key, "ignoring unreadable local collection: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        };
        let count = entities.len();
        *self.write() = entities;
        debug!(kind = %self.kind, count, "loaded local collection");
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<FinancialEntity> {
        self.read().iter().find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub async fn add(&self, entity: FinancialEntity) -> SyncOutcome {
        self.save(entity, SyncIntent::Create).await
    }

    pub async fn update(&self, entity: FinancialEntity) -> SyncOutcome {
        self.save(entity, SyncIntent::Update).await
    }

    pub async fn remove(&self, id: &str) -> SyncOutcome {
        let outcome = self.sync.delete_entity(self.kind, id).await;
        if outcome.success {
            self.write().retain(|e| e.id != id);
            self.persist().await;
        }
        outcome
    }

    /// Push every cached entity to the remote store. Identifiers replaced
    /// during normalization are written back to the cache.
    pub async fn push_all(&self) -> BatchResult {
        let mut snapshot = self.get_all();
        let result = self.sync.upsert_batch(&mut snapshot, SyncIntent::Update).await;
        *self.write() = snapshot;
        self.persist().await;
        result
    }

    async fn save(&self, mut entity: FinancialEntity, intent: SyncIntent) -> SyncOutcome {
        let original_id = entity.id.clone();
        let outcome = self.sync.upsert_entity(&mut entity, intent).await;
        if !outcome.success {
            return outcome;
        }

        {
            let mut items = self.write();
            items.retain(|e| e.id != original_id && e.id != entity.id);
            items.push(entity);
        }
        self.persist().await;
        outcome
    }

    async fn persist(&self) {
        if let Err(e) = self.write_local(&self.get_all()).await {
            error!(kind = %self.kind, "failed to persist local collection: {e}");
        }
    }

    async fn write_local(&self, entities: &[FinancialEntity]) -> Result<(), StoreError> {
        let json = serde_json::to_string(entities)?;
        self.local.set(&self.kind.storage_key(), &json).await
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<FinancialEntity>> {
        self.items.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<FinancialEntity>> {
        self.items.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DomainService for EntityService {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn get_all(&self) -> Vec<FinancialEntity> {
        self.read().clone()
    }

    async fn bulk_set(&self, entities: Vec<FinancialEntity>) -> Result<(), StoreError> {
        self.write_local(&entities).await?;
        *self.write() = entities;
        Ok(())
    }

    fn clear_cache(&self) {
        self.write().clear();
    }
}

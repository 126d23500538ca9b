//! Entity-state lookups used while matching filtered subscriptions.

use crate::error::StateError;
use async_trait::async_trait;
use parking_lot::RwLock;
use sensorgraph_query::{CompiledPredicate, MemoryStore, Row};
use sensorgraph_schema::Registry;
use std::sync::Arc;

/// Read access to committed entity state, provided by the persistence layer.
#[async_trait]
pub trait EntityStateSource: Send + Sync {
    /// Current row for `key`, or `None` if the entity no longer exists.
    async fn current_state(&self, entity_type: &str, key: u32)
        -> Result<Option<Row>, StateError>;

    /// Whether the entity `key` currently satisfies `filter`.
    async fn satisfies(&self, filter: &CompiledPredicate, key: u32) -> Result<bool, StateError>;
}

/// `EntityStateSource` over a shared in-memory store.
#[derive(Debug, Clone)]
pub struct SharedStore {
    schema: Arc<Registry>,
    store: Arc<RwLock<MemoryStore>>,
}

impl SharedStore {
    pub fn new(schema: Arc<Registry>, store: MemoryStore) -> Self {
        Self {
            schema,
            store: Arc::new(RwLock::new(store)),
        }
    }

    pub fn store(&self) -> &Arc<RwLock<MemoryStore>> {
        &self.store
    }
}

#[async_trait]
impl EntityStateSource for SharedStore {
    async fn current_state(
        &self,
        entity_type: &str,
        key: u32,
    ) -> Result<Option<Row>, StateError> {
        let ty = self
            .schema
            .entity(entity_type)
            .ok_or_else(|| StateError::UnknownEntityType(entity_type.to_string()))?;
        Ok(self.store.read().row(&ty.table, key).cloned())
    }

    async fn satisfies(&self, filter: &CompiledPredicate, key: u32) -> Result<bool, StateError> {
        Ok(self.store.read().matches(filter, key)?)
    }
}

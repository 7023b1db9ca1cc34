//! Process-wide type name ⇄ id cache.
//!
//! Type names never change their id once assigned, so entries are kept for
//! the life of the process and never evicted. Two tasks resolving the same
//! unseen name may both reach storage; `get_or_create_type_id` is idempotent
//! so they agree on the id.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::model::{AgentType, AggregateType, EventType};
use crate::storage::{Result, StorageEngine, TypeKind};

/// Memoized mapping between type names and their storage ids.
#[derive(Default)]
pub struct IdentifierCache {
    ids: RwLock<HashMap<(TypeKind, String), i32>>,
    names: RwLock<HashMap<(TypeKind, i32), String>>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `name` within `kind`, asking `storage` on first use. Callers
    /// pass names already validated by their typed constructors.
    async fn resolve<S>(&self, kind: TypeKind, name: &str, storage: &S) -> Result<i32>
    where
        S: StorageEngine + ?Sized,
    {
        if let Some(id) = self.ids.read().await.get(&(kind, name.to_string())) {
            return Ok(*id);
        }

        let id = storage.get_or_create_type_id(kind, name).await?;
        debug!(%kind, name, id, "Resolved type id");

        self.ids.write().await.insert((kind, name.to_string()), id);
        self.names.write().await.insert((kind, id), name.to_string());
        Ok(id)
    }

    pub async fn aggregate_type_id<S>(&self, name: &AggregateType, storage: &S) -> Result<i32>
    where
        S: StorageEngine + ?Sized,
    {
        self.resolve(TypeKind::Aggregate, name.as_str(), storage).await
    }

    pub async fn event_type_id<S>(&self, name: &EventType, storage: &S) -> Result<i32>
    where
        S: StorageEngine + ?Sized,
    {
        self.resolve(TypeKind::Event, name.as_str(), storage).await
    }

    pub async fn agent_type_id<S>(&self, name: &AgentType, storage: &S) -> Result<i32>
    where
        S: StorageEngine + ?Sized,
    {
        self.resolve(TypeKind::Agent, name.as_str(), storage).await
    }

    /// Cached name for an id. Does not consult storage.
    pub async fn name_of(&self, kind: TypeKind, id: i32) -> Option<String> {
        self.names.read().await.get(&(kind, id)).cloned()
    }

    /// Number of cached names across all kinds.
    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

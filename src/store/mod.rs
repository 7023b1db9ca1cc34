//! Event store facade.
//!
//! [`EventStore`] ties a storage engine to the process-wide caches and the
//! event registry, and hands out units of work:
//!
//! - [`EventStore::begin`] opens a [`WriteContext`] over a fresh storage
//!   transaction. Its events and snapshots are persisted by
//!   [`WriteContext::commit`], atomically.
//! - [`EventStore::read_context`] opens a [`ReadContext`] that can only load.
//! - [`EventStore::with_context`] / [`EventStore::with_readonly_context`] run
//!   a closure against a context and commit on success.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregate::Aggregate;
use crate::cache::{CacheLoader, CacheStats, IdentifierCache, LruCache};
use crate::config::{AgentCacheConfig, EngineConfig};
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::model::{Agent, AggregateEvent, EventDto, Snapshot, SnapshotDto};
use crate::registry::EventRegistry;
use crate::storage::{init_storage, StorageEngine, StorageError, TypeKind};

/// Resolves an [`Agent`] to its storage id on agent cache misses.
pub(crate) struct AgentResolver {
    engine: Arc<dyn StorageEngine>,
    identifiers: Arc<IdentifierCache>,
}

#[async_trait]
impl CacheLoader<Agent, i64> for AgentResolver {
    type Error = StorageError;

    async fn load(&self, agent: &Agent) -> std::result::Result<i64, StorageError> {
        let agent_type_id = self
            .identifiers
            .agent_type_id(&agent.agent_type, self.engine.as_ref())
            .await?;
        let agent_id = self
            .engine
            .get_or_create_agent_id(agent_type_id, agent.agent_key.as_ref(), agent.system_id)
            .await?;
        debug!(%agent, agent_id, "Resolved agent id");
        Ok(agent_id)
    }
}

/// State shared by the store and every context it opens.
pub(crate) struct StoreInner {
    pub(crate) engine: Arc<dyn StorageEngine>,
    pub(crate) registry: EventRegistry,
    pub(crate) identifiers: Arc<IdentifierCache>,
    pub(crate) agents: LruCache<Agent, i64, AgentResolver>,
}

impl StoreInner {
    /// Storage id of `A`'s type name. An invalid name is rejected before
    /// storage is consulted.
    pub(crate) async fn aggregate_type_id<A: Aggregate>(&self) -> Result<i32> {
        let aggregate_type = A::aggregate_type()?;
        Ok(self
            .identifiers
            .aggregate_type_id(&aggregate_type, self.engine.as_ref())
            .await?)
    }

    /// Storage shape of a captured event.
    pub(crate) async fn event_dto(&self, event: &AggregateEvent) -> Result<EventDto> {
        let engine = self.engine.as_ref();
        let (aggregate_type_id, event_type_id, agent_id) = futures::try_join!(
            self.identifiers.aggregate_type_id(&event.aggregate_type, engine),
            self.identifiers.event_type_id(&event.event_type, engine),
            self.agents.get(&event.agent),
        )?;

        Ok(EventDto {
            aggregate_type_id,
            aggregate_id: event.aggregate_id,
            event_type_id,
            sequence: event.sequence,
            payload: event.payload.clone(),
            agent_id,
            event_time: event.event_time,
        })
    }

    /// Storage shape of a snapshot.
    pub(crate) async fn snapshot_dto(&self, snapshot: &Snapshot) -> Result<SnapshotDto> {
        let aggregate_type_id = self
            .identifiers
            .aggregate_type_id(&snapshot.aggregate_type, self.engine.as_ref())
            .await?;

        Ok(SnapshotDto {
            aggregate_type_id,
            aggregate_id: snapshot.aggregate_id,
            version: snapshot.version,
            sequence: snapshot.sequence,
            state: snapshot.state.clone(),
        })
    }

    /// Convert a storage error, naming the aggregate type in conflicts when
    /// it is known.
    pub(crate) async fn describe(&self, error: StorageError) -> Error {
        match error {
            StorageError::DuplicateKey(mut e) => {
                if e.aggregate_type.is_none() {
                    e.aggregate_type = self.aggregate_type_name(e.aggregate_type_id).await;
                }
                warn!(error = %e, "Natural key conflict");
                Error::DuplicateKey(e)
            }
            StorageError::SequenceConflict(mut e) => {
                if e.aggregate_type.is_none() {
                    e.aggregate_type = self.aggregate_type_name(e.aggregate_type_id).await;
                }
                warn!(error = %e, "Sequence conflict");
                Error::SequenceConflict(e)
            }
            other => Error::Storage(other),
        }
    }

    async fn aggregate_type_name(&self, id: i32) -> Option<crate::model::AggregateType> {
        let name = self.identifiers.name_of(TypeKind::Aggregate, id).await?;
        crate::model::AggregateType::new(name).ok()
    }
}

/// Entry point for event-sourced units of work.
///
/// Cheap to clone; clones share the storage engine and caches.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<StoreInner>,
}

impl EventStore {
    /// Create a store with the default agent cache settings.
    pub fn new(engine: Arc<dyn StorageEngine>, registry: EventRegistry) -> Self {
        Self::with_agent_cache(engine, registry, &AgentCacheConfig::default())
    }

    /// Create a store using the cache settings of `config`.
    pub fn with_config(
        engine: Arc<dyn StorageEngine>,
        registry: EventRegistry,
        config: &EngineConfig,
    ) -> Self {
        Self::with_agent_cache(engine, registry, &config.agent_cache)
    }

    /// Initialize the configured storage engine and wrap it in a store.
    pub async fn from_config(registry: EventRegistry, config: &EngineConfig) -> Result<Self> {
        let engine = init_storage(&config.storage).await?;
        Ok(Self::with_config(engine, registry, config))
    }

    fn with_agent_cache(
        engine: Arc<dyn StorageEngine>,
        registry: EventRegistry,
        agent_cache: &AgentCacheConfig,
    ) -> Self {
        let identifiers = Arc::new(IdentifierCache::new());
        let agents = LruCache::new(
            agent_cache.capacity,
            agent_cache.ttl(),
            AgentResolver {
                engine: Arc::clone(&engine),
                identifiers: Arc::clone(&identifiers),
            },
        );

        Self {
            inner: Arc::new(StoreInner {
                engine,
                registry,
                identifiers,
                agents,
            }),
        }
    }

    /// Open a unit of work over a new storage transaction.
    ///
    /// Dropping the context without committing rolls the transaction back.
    pub async fn begin(&self, cancel: CancellationToken) -> Result<WriteContext> {
        let tx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            tx = self.inner.engine.begin() => tx?,
        };
        Ok(WriteContext::new(Arc::clone(&self.inner), tx, cancel))
    }

    /// Open a load-only context reading committed state.
    pub fn read_context(&self, cancel: CancellationToken) -> ReadContext {
        ReadContext::new(Arc::clone(&self.inner), cancel)
    }

    /// Run `action` in a unit of work, committing if it succeeds.
    ///
    /// ```ignore
    /// let id = store
    ///     .with_context(cancel, |ctx| {
    ///         Box::pin(async move {
    ///             let mut user = ctx.create::<User>(None).await?;
    ///             ctx.apply(registered, &mut user, &agent, None)?;
    ///             Ok(user.id())
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_context<T, F>(&self, cancel: CancellationToken, action: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut WriteContext) -> BoxFuture<'c, Result<T>>,
    {
        let mut context = self.begin(cancel).await?;
        let value = match action(&mut context).await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Unit of work failed, rolling back");
                if let Err(rollback_error) = context.rollback().await {
                    warn!(error = %rollback_error, "Rollback failed");
                }
                return Err(e);
            }
        };
        context.commit().await?;
        Ok(value)
    }

    /// Run `action` against a load-only context.
    pub async fn with_readonly_context<T, F>(
        &self,
        cancel: CancellationToken,
        action: F,
    ) -> Result<T>
    where
        F: for<'c> FnOnce(&'c ReadContext) -> BoxFuture<'c, Result<T>>,
    {
        let context = self.read_context(cancel);
        action(&context).await
    }

    /// Storage id of an agent, through the agent cache.
    pub async fn agent_id(&self, agent: &Agent) -> Result<i64> {
        Ok(self.inner.agents.get(agent).await?)
    }

    /// Agent cache counters.
    pub async fn agent_cache_stats(&self) -> CacheStats {
        self.inner.agents.stats().await
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.inner.registry
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.inner.engine
    }
}

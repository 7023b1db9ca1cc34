//! Storage engine contract and implementations.
//!
//! The engine core never touches persisted state directly. It depends only
//! on the traits below:
//!
//! - [`HistoryReader`]: read snapshots and ordered events of one aggregate.
//! - [`StorageEngine`]: process-wide vocabulary (type and agent ids), plus
//!   opening transactions.
//! - [`StorageTransaction`]: the explicit atomic scope of one unit of work.
//!   Aggregate creation, event appends and snapshot saves made through it
//!   become visible together on [`StorageTransaction::commit`], or not at
//!   all.
//!
//! Vocabulary resolution (`get_or_create_*`) lives on the engine, outside any
//! transaction. Resolved ids are cached process-wide.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::error::{DuplicateKeyError, SequenceError};
use crate::model::{AgentKey, AggregateEvent, EventDto, NaturalKey, Snapshot, SnapshotDto};

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryStorageEngine;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Which vocabulary a type name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeKind {
    Aggregate,
    Event,
    Agent,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Aggregate => f.write_str("aggregate type"),
            TypeKind::Event => f.write_str("event type"),
            TypeKind::Agent => f.write_str("agent type"),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    DuplicateKey(#[from] DuplicateKeyError),

    #[error(transparent)]
    SequenceConflict(#[from] SequenceError),

    #[error("Unknown {kind} id: {id}")]
    UnknownIdentifier { kind: TypeKind, id: i64 },

    #[error("Unknown agent id: {0}")]
    UnknownAgent(i64),

    #[error("Invalid stored name: {0}")]
    InvalidName(#[from] crate::model::NameError),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Read access to aggregate history.
#[async_trait]
pub trait HistoryReader: Send + Sync {
    /// Events of one aggregate with `after_sequence < sequence <= max_sequence`
    /// (no upper bound when `None`), ascending by sequence.
    async fn get_events(
        &self,
        aggregate_type_id: i32,
        aggregate_id: i64,
        after_sequence: i64,
        max_sequence: Option<i64>,
    ) -> Result<Vec<AggregateEvent>>;

    /// The aggregate's snapshot, if one is stored with exactly `version` and
    /// a sequence not above `max_sequence`.
    async fn get_snapshot(
        &self,
        aggregate_type_id: i32,
        aggregate_id: i64,
        version: i32,
        max_sequence: Option<i64>,
    ) -> Result<Option<Snapshot>>;
}

/// Interface every persistence backend implements.
///
/// Implementations:
/// - `MemoryStorageEngine`: in-memory reference engine
#[async_trait]
pub trait StorageEngine: HistoryReader {
    /// Id of a type name, created on first use.
    ///
    /// Idempotent: concurrent callers racing on an unseen name all receive
    /// the same id.
    async fn get_or_create_type_id(&self, kind: TypeKind, name: &str) -> Result<i32>;

    /// Id of an agent, created on first use. Idempotent.
    async fn get_or_create_agent_id(
        &self,
        agent_type_id: i32,
        agent_key: Option<&AgentKey>,
        system_id: Option<i64>,
    ) -> Result<i64>;

    /// Open the atomic scope for one unit of work.
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>>;
}

/// Atomic scope of one unit of work.
///
/// Reads through the transaction observe its own uncommitted writes.
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back.
#[async_trait]
pub trait StorageTransaction: HistoryReader {
    /// Allocate an aggregate id, claiming `natural_key` if given.
    ///
    /// Returns [`StorageError::DuplicateKey`] if another aggregate of the
    /// same type holds the key.
    async fn create_aggregate(
        &mut self,
        aggregate_type_id: i32,
        natural_key: Option<&NaturalKey>,
    ) -> Result<i64>;

    /// Append a batch of events.
    ///
    /// Per aggregate, each event must carry the sequence directly following
    /// the previous one. Otherwise the whole batch is rejected with
    /// [`StorageError::SequenceConflict`] and nothing is appended.
    async fn append_events(&mut self, events: Vec<EventDto>) -> Result<()>;

    /// Store a snapshot, replacing any previous snapshot of the aggregate.
    async fn save_snapshot(&mut self, snapshot: SnapshotDto) -> Result<()>;

    /// Make every write of this transaction durable and visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn StorageEngine>> {
    info!(storage_type = ?config.storage_type, "Initializing storage engine");

    match config.storage_type {
        #[cfg(feature = "memory")]
        StorageType::Memory => Ok(Arc::new(MemoryStorageEngine::new())),
        #[cfg(not(feature = "memory"))]
        StorageType::Memory => {
            tracing::error!("Memory storage requested but 'memory' feature is not enabled");
            Err(StorageError::Backend(
                "memory feature not enabled".to_string(),
            ))
        }
    }
}

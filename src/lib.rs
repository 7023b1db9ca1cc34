//! Chronik - event-sourcing engine
//!
//! Aggregates are rebuilt from their ordered event history, optionally
//! starting from a versioned snapshot. Changes are made in units of work:
//! a [`WriteContext`] captures applied events and commits them, plus any due
//! snapshots, atomically through a pluggable [`storage::StorageEngine`].

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod registry;
pub mod storage;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;

pub use aggregate::{Aggregate, Event, SnapshotPolicy};
pub use config::EngineConfig;
pub use context::{ReadContext, WriteContext};
pub use error::{DuplicateKeyError, Error, Result, SequenceError};
pub use model::{
    Agent, AgentKey, AgentType, AggregateEvent, AggregateRef, AggregateType, EventType,
    NaturalKey, Snapshot,
};
pub use registry::{EventRegistry, EventRegistryBuilder, RegistryError};
pub use store::EventStore;
pub use tokio_util::sync::CancellationToken;

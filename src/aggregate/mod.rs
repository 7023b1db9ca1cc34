//! Aggregate and event traits.
//!
//! An aggregate is an entity whose state is derived from its ordered event
//! history. Each aggregate declares a closed `Event` enum; individual event
//! payload structs implement [`Event`] and convert into that enum, so
//! [`Aggregate::apply_event`] can match exhaustively.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{Agent, AggregateType, EventType, Snapshot};

pub mod replay;

pub use replay::{hydrate, ReplayState};

/// A serializable event payload.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name identifying the payload layout in storage.
    const EVENT_TYPE: &'static str;

    fn event_type() -> Result<EventType> {
        Ok(EventType::new(Self::EVENT_TYPE)?)
    }
}

/// When and in which layout an aggregate is snapshotted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Layout version of the snapshot state. Stored snapshots of any other
    /// version are ignored on load.
    pub version: i32,
    /// A snapshot is taken whenever the sequence crosses a multiple of this
    /// value. Zero or negative disables snapshotting.
    pub frequency: i64,
}

impl SnapshotPolicy {
    pub fn new(version: i32, frequency: i64) -> Self {
        Self { version, frequency }
    }

    /// Whether advancing from `start` to `end` crosses a snapshot boundary.
    pub fn crosses_boundary(&self, start: i64, end: i64) -> bool {
        self.frequency > 0 && start / self.frequency != end / self.frequency
    }
}

/// An event-sourced entity.
///
/// Implementations keep their own `sequence`, advancing it to the value
/// passed to [`apply_event`](Self::apply_event). The engine verifies this
/// after every applied event.
pub trait Aggregate: Send + Sync + Sized + 'static {
    /// Stable name of the aggregate type in storage.
    const AGGREGATE_TYPE: &'static str;

    /// Closed set of events this aggregate understands.
    type Event: Send + Sync + 'static;

    /// Fresh instance at sequence 0.
    fn initialize(id: i64) -> Self;

    fn id(&self) -> i64;

    /// Sequence of the last applied event; 0 before any.
    fn sequence(&self) -> i64;

    /// Fold one event into the aggregate's state.
    fn apply_event(
        &mut self,
        event: &Self::Event,
        sequence: i64,
        agent: &Agent,
        event_time: DateTime<Utc>,
    );

    /// Snapshot settings, or `None` if the aggregate is never snapshotted.
    fn snapshot_policy() -> Option<SnapshotPolicy> {
        None
    }

    /// Capture current state. Required when a snapshot policy is set.
    fn take_snapshot(&self) -> Result<Snapshot> {
        Err(Error::Snapshot {
            aggregate_type: Self::aggregate_type()?,
            aggregate_id: self.id(),
            message: "aggregate does not support snapshots".to_string(),
        })
    }

    /// Restore state and sequence from a snapshot.
    fn apply_snapshot(&mut self, _snapshot: &Snapshot) -> Result<()> {
        Err(Error::Snapshot {
            aggregate_type: Self::aggregate_type()?,
            aggregate_id: self.id(),
            message: "aggregate does not support snapshots".to_string(),
        })
    }

    fn aggregate_type() -> Result<AggregateType> {
        Ok(AggregateType::new(Self::AGGREGATE_TYPE)?)
    }
}

/// Report a failed snapshot capture or restore as [`Error::Snapshot`].
pub(crate) fn snapshot_error(
    error: Error,
    aggregate_type: &AggregateType,
    aggregate_id: i64,
) -> Error {
    match error {
        Error::Snapshot { .. } => error,
        other => Error::Snapshot {
            aggregate_type: aggregate_type.clone(),
            aggregate_id,
            message: other.to_string(),
        },
    }
}

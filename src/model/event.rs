//! Event records.

use std::fmt;

use chrono::{DateTime, Utc};

use super::agent::Agent;
use super::names::{AggregateType, EventType};

/// A persisted or captured event with every type name resolved.
///
/// This is the shape replay consumes and the shape a unit of work captures
/// before commit. Once built it is never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateEvent {
    pub aggregate_type: AggregateType,
    pub aggregate_id: i64,
    pub event_type: EventType,
    pub sequence: i64,
    /// Serialized event payload.
    pub payload: String,
    pub agent: Agent,
    pub event_time: DateTime<Utc>,
}

/// Storage shape of an event: type names and agent replaced by ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDto {
    pub aggregate_type_id: i32,
    pub aggregate_id: i64,
    pub event_type_id: i32,
    pub sequence: i64,
    pub payload: String,
    pub agent_id: i64,
    /// Always UTC; backends normalize on write.
    pub event_time: DateTime<Utc>,
}

/// Identity of one aggregate instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateRef {
    pub aggregate_type: AggregateType,
    pub aggregate_id: i64,
}

impl AggregateRef {
    pub fn new(aggregate_type: AggregateType, aggregate_id: i64) -> Self {
        Self {
            aggregate_type,
            aggregate_id,
        }
    }
}

impl fmt::Display for AggregateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.aggregate_id)
    }
}

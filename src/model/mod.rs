//! Domain data model: strong names, agents, events and snapshots.

pub mod agent;
pub mod event;
pub mod names;
pub mod snapshot;

pub use agent::{Agent, AgentDto};
pub use event::{AggregateEvent, AggregateRef, EventDto};
pub use names::{
    AgentKey, AgentType, AggregateType, EventType, NameError, NaturalKey, MAX_NAME_LENGTH,
};
pub use snapshot::{Snapshot, SnapshotDto};

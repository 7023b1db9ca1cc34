//! Snapshots: serialized point-in-time aggregate state.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::names::AggregateType;

/// Versioned state of one aggregate at a specific sequence.
///
/// `version` describes the layout of `state`. Loading asks for the version
/// the aggregate currently understands; a stored snapshot of any other
/// version is ignored and the aggregate is rebuilt from events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub aggregate_type: AggregateType,
    pub aggregate_id: i64,
    pub version: i32,
    pub sequence: i64,
    pub state: String,
}

impl Snapshot {
    /// Serialize `state` into a snapshot.
    pub fn capture<S: Serialize>(
        aggregate_type: AggregateType,
        aggregate_id: i64,
        version: i32,
        sequence: i64,
        state: &S,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_type,
            aggregate_id,
            version,
            sequence,
            state: serde_json::to_string(state)?,
        })
    }

    /// Deserialize the captured state.
    pub fn restore<S: DeserializeOwned>(&self) -> Result<S, serde_json::Error> {
        serde_json::from_str(&self.state)
    }
}

/// Storage shape of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDto {
    pub aggregate_type_id: i32,
    pub aggregate_id: i64,
    pub version: i32,
    pub sequence: i64,
    pub state: String,
}

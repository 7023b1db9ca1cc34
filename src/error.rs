//! Crate error types.
//!
//! Errors fall into three families that callers treat differently:
//!
//! - **validation**: malformed names or registrations, rejected at
//!   construction;
//! - **conflict**: duplicate natural keys and sequence conflicts, returned as
//!   values the caller is expected to branch on ([`Error::is_conflict`]);
//! - **integrity**: undecodable stored events or aggregates that failed to
//!   advance their sequence ([`Error::is_integrity_violation`]). These abort
//!   the unit of work; retrying cannot help.

use std::fmt;

use crate::model::{AggregateType, EventType, NameError, NaturalKey};
use crate::registry::RegistryError;
use crate::storage::StorageError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A natural key is already taken by another aggregate of the same type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKeyError {
    pub aggregate_type_id: i32,
    /// Filled in by the engine when the type name is known.
    pub aggregate_type: Option<AggregateType>,
    pub natural_key: NaturalKey,
}

impl fmt::Display for DuplicateKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.aggregate_type {
            Some(ref name) => write!(
                f,
                "Duplicate natural key '{}' for aggregate type {}",
                self.natural_key, name
            ),
            None => write!(
                f,
                "Duplicate natural key '{}' for aggregate type id {}",
                self.natural_key, self.aggregate_type_id
            ),
        }
    }
}

impl std::error::Error for DuplicateKeyError {}

/// An appended event does not directly follow the aggregate's last sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceError {
    pub aggregate_type_id: i32,
    /// Filled in by the engine when the type name is known.
    pub aggregate_type: Option<AggregateType>,
    pub aggregate_id: i64,
    pub expected: i64,
    pub actual: i64,
}

impl fmt::Display for SequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sequence conflict on aggregate ")?;
        match self.aggregate_type {
            Some(ref name) => write!(f, "{}", name)?,
            None => write!(f, "type id {}", self.aggregate_type_id)?,
        }
        write!(
            f,
            "/{}: expected {}, got {}",
            self.aggregate_id, self.expected, self.actual
        )
    }
}

impl std::error::Error for SequenceError {}

/// Errors surfaced by the event store and its units of work.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid name: {0}")]
    InvalidName(#[from] NameError),

    #[error("Invalid event registration: {0}")]
    Registration(#[from] RegistryError),

    #[error(transparent)]
    DuplicateKey(DuplicateKeyError),

    #[error(transparent)]
    SequenceConflict(SequenceError),

    #[error("Aggregate {aggregate_type}/{aggregate_id} did not advance its sequence: expected {expected}, found {actual}")]
    SequenceNotAdvanced {
        aggregate_type: AggregateType,
        aggregate_id: i64,
        expected: i64,
        actual: i64,
    },

    #[error("Unknown event type {event_type} for aggregate type {aggregate_type}")]
    UnknownEventType {
        aggregate_type: AggregateType,
        event_type: EventType,
    },

    #[error("Failed to decode {event_type} at {aggregate_type}/{aggregate_id} sequence {sequence}: {source}")]
    Deserialization {
        aggregate_type: AggregateType,
        aggregate_id: i64,
        event_type: EventType,
        sequence: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Snapshot error for {aggregate_type}/{aggregate_id}: {message}")]
    Snapshot {
        aggregate_type: AggregateType,
        aggregate_id: i64,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unit of work aborted by an earlier integrity violation")]
    Poisoned,

    #[error("Unit of work cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl Error {
    /// Returns true for conflicts the caller may resolve, e.g. by re-reading
    /// and retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::DuplicateKey(_) | Error::SequenceConflict(_))
    }

    /// Returns true for defects: corrupted history or a broken aggregate.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Error::SequenceNotAdvanced { .. }
                | Error::UnknownEventType { .. }
                | Error::Deserialization { .. }
                | Error::Snapshot { .. }
                | Error::Poisoned
        )
    }
}

impl From<StorageError> for Error {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::DuplicateKey(e) => Error::DuplicateKey(e),
            StorageError::SequenceConflict(e) => Error::SequenceConflict(e),
            other => Error::Storage(other),
        }
    }
}

//! Aggregate replay: rebuild state from a snapshot plus newer events.

use tracing::{debug, error};

use super::{snapshot_error, Aggregate};
use crate::error::{Error, Result};
use crate::registry::EventRegistry;
use crate::storage::HistoryReader;

/// Progress of one replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Uninitialized,
    /// Snapshot and events are being applied.
    Hydrating,
    Hydrated,
    /// Neither a snapshot nor any event exists.
    NotFound,
}

/// Tracks a single aggregate through replay.
struct Replay<A> {
    state: ReplayState,
    aggregate: A,
    sequence: i64,
}

impl<A: Aggregate> Replay<A> {
    fn new(id: i64) -> Self {
        Self {
            state: ReplayState::Uninitialized,
            aggregate: A::initialize(id),
            sequence: 0,
        }
    }

    fn advance(&mut self, sequence: i64) {
        self.state = ReplayState::Hydrating;
        self.sequence = sequence;
    }

    fn finish(mut self) -> Result<Option<A>> {
        if self.state == ReplayState::Uninitialized {
            self.state = ReplayState::NotFound;
            debug!(
                aggregate_type = A::AGGREGATE_TYPE,
                aggregate_id = self.aggregate.id(),
                state = ?self.state,
                "No history found"
            );
            return Ok(None);
        }

        let actual = self.aggregate.sequence();
        if actual != self.sequence {
            error!(
                aggregate_type = A::AGGREGATE_TYPE,
                aggregate_id = self.aggregate.id(),
                expected = self.sequence,
                actual,
                "Aggregate did not advance its sequence during replay"
            );
            return Err(Error::SequenceNotAdvanced {
                aggregate_type: A::aggregate_type()?,
                aggregate_id: self.aggregate.id(),
                expected: self.sequence,
                actual,
            });
        }

        self.state = ReplayState::Hydrated;
        debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            aggregate_id = self.aggregate.id(),
            sequence = self.sequence,
            state = ?self.state,
            "Replayed aggregate"
        );
        Ok(Some(self.aggregate))
    }
}

/// Rebuild aggregate `id` from `reader`.
///
/// Applies the stored snapshot (when `A` has a snapshot policy and a snapshot
/// of its current version exists), then every later event, all bounded by
/// `max_sequence` when given.
///
/// # Returns
/// `Ok(None)` when the aggregate has neither snapshot nor events.
///
/// # Errors
/// Integrity errors when a stored event cannot be decoded or the aggregate
/// does not end at the sequence of the last applied event.
pub async fn hydrate<A, R>(
    reader: &R,
    registry: &EventRegistry,
    aggregate_type_id: i32,
    id: i64,
    max_sequence: Option<i64>,
) -> Result<Option<A>>
where
    A: Aggregate,
    R: HistoryReader + ?Sized,
{
    let mut replay = Replay::<A>::new(id);

    if let Some(policy) = A::snapshot_policy() {
        let snapshot = reader
            .get_snapshot(aggregate_type_id, id, policy.version, max_sequence)
            .await?;
        if let Some(snapshot) = snapshot {
            replay
                .aggregate
                .apply_snapshot(&snapshot)
                .map_err(|e| snapshot_error(e, &snapshot.aggregate_type, id))?;
            replay.advance(snapshot.sequence);
            debug!(
                aggregate_type = A::AGGREGATE_TYPE,
                aggregate_id = id,
                sequence = snapshot.sequence,
                "Applied snapshot"
            );
        }
    }

    let events = reader
        .get_events(aggregate_type_id, id, replay.sequence, max_sequence)
        .await?;

    for event in events {
        let Some(decode) = registry.decoder::<A>(&event.event_type) else {
            error!(
                aggregate_type = %event.aggregate_type,
                event_type = %event.event_type,
                "No decoder registered for stored event"
            );
            return Err(Error::UnknownEventType {
                aggregate_type: event.aggregate_type,
                event_type: event.event_type,
            });
        };

        let decoded = decode(&event.payload).map_err(|source| Error::Deserialization {
            aggregate_type: event.aggregate_type.clone(),
            aggregate_id: event.aggregate_id,
            event_type: event.event_type.clone(),
            sequence: event.sequence,
            source,
        })?;

        replay
            .aggregate
            .apply_event(&decoded, event.sequence, &event.agent, event.event_time);
        replay.advance(event.sequence);
    }

    replay.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::Counter;

    #[test]
    fn test_untouched_replay_is_not_found() {
        let replay = Replay::<Counter>::new(1);
        assert_eq!(replay.state, ReplayState::Uninitialized);
        assert!(replay.finish().unwrap().is_none());
    }

    #[test]
    fn test_advance_marks_hydrating() {
        let mut replay = Replay::<Counter>::new(1);
        replay.advance(3);
        assert_eq!(replay.state, ReplayState::Hydrating);
        assert_eq!(replay.sequence, 3);
    }

    #[test]
    fn test_finish_detects_sequence_mismatch() {
        let mut replay = Replay::<Counter>::new(1);
        replay.advance(3);

        let err = replay.finish().unwrap_err();

        assert!(matches!(
            err,
            Error::SequenceNotAdvanced {
                expected: 3,
                actual: 0,
                ..
            }
        ));
    }
}

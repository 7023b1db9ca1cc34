//! Sequence integrity checks.
//!
//! Persisted sequences of every aggregate must be exactly `1..=N`. Storage
//! engines run [`check_batch`] inside the same atomic step that inserts the
//! batch, so no concurrent writer can slip between check and insert.

use std::collections::HashMap;

use crate::error::SequenceError;
use crate::model::EventDto;

/// Result of a single sequence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceValidationResult {
    /// Sequence matches expected value.
    Valid,
    /// Sequence mismatch detected.
    Mismatch { expected: i64, actual: i64 },
}

/// Validates that `actual` directly follows `last_sequence`.
pub fn validate_sequence(last_sequence: i64, actual: i64) -> SequenceValidationResult {
    let expected = last_sequence + 1;
    if actual == expected {
        SequenceValidationResult::Valid
    } else {
        SequenceValidationResult::Mismatch { expected, actual }
    }
}

/// Validates a batch of events against the stored last sequences.
///
/// `last_sequence` is consulted once per distinct aggregate id and returns
/// the last stored sequence (0 when the aggregate has no events). Events are
/// checked in batch order; the first gap or duplicate rejects the whole
/// batch.
///
/// # Returns
/// The new last sequence of every aggregate touched by the batch, to be
/// stored together with the events.
pub fn check_batch<F>(
    events: &[EventDto],
    mut last_sequence: F,
) -> Result<HashMap<i64, i64>, SequenceError>
where
    F: FnMut(i64) -> i64,
{
    let mut advanced: HashMap<i64, i64> = HashMap::new();

    for event in events {
        let last = *advanced
            .entry(event.aggregate_id)
            .or_insert_with(|| last_sequence(event.aggregate_id));

        if let SequenceValidationResult::Mismatch { expected, actual } =
            validate_sequence(last, event.sequence)
        {
            return Err(SequenceError {
                aggregate_type_id: event.aggregate_type_id,
                aggregate_type: None,
                aggregate_id: event.aggregate_id,
                expected,
                actual,
            });
        }

        advanced.insert(event.aggregate_id, event.sequence);
    }

    Ok(advanced)
}

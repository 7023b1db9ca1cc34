//! Units of work.
//!
//! A [`WriteContext`] wraps one storage transaction. Aggregates created or
//! loaded through it see the transaction's own writes; events applied
//! through it are captured in order and persisted by
//! [`WriteContext::commit`] together with any due snapshots.
//!
//! A [`ReadContext`] only loads committed state. It has no `create` or
//! `apply`.
//!
//! Every storage call races the context's cancellation token. Integrity
//! violations poison a write context: it refuses further work and cannot
//! commit.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregate::{hydrate, snapshot_error, Aggregate, Event};
use crate::error::{Error, Result};
use crate::model::{Agent, AggregateEvent, AggregateRef, AggregateType, NaturalKey, Snapshot};
use crate::storage::{StorageError, StorageTransaction};
use crate::store::StoreInner;

/// Run `operation` unless `cancel` fires first.
async fn race<F: Future>(cancel: &CancellationToken, operation: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("Unit of work cancelled");
            Err(Error::Cancelled)
        }
        output = operation => Ok(output),
    }
}

/// Reject a captured snapshot that does not describe the aggregate at
/// `sequence` in the policy's layout version.
fn check_snapshot(
    snapshot: Snapshot,
    aggregate_type: &AggregateType,
    aggregate_id: i64,
    version: i32,
    sequence: i64,
) -> Result<Snapshot> {
    let mismatch = if snapshot.aggregate_type != *aggregate_type
        || snapshot.aggregate_id != aggregate_id
    {
        Some(format!(
            "snapshot captured for {}/{}",
            snapshot.aggregate_type, snapshot.aggregate_id
        ))
    } else if snapshot.version != version {
        Some(format!(
            "snapshot version {} does not match policy version {version}",
            snapshot.version
        ))
    } else if snapshot.sequence != sequence {
        Some(format!(
            "snapshot sequence {} does not match aggregate sequence {sequence}",
            snapshot.sequence
        ))
    } else {
        None
    };

    match mismatch {
        None => Ok(snapshot),
        Some(message) => Err(Error::Snapshot {
            aggregate_type: aggregate_type.clone(),
            aggregate_id,
            message,
        }),
    }
}

/// Read-write unit of work.
pub struct WriteContext {
    inner: Arc<StoreInner>,
    tx: Box<dyn StorageTransaction>,
    cancel: CancellationToken,
    captured: Vec<AggregateEvent>,
    /// Latest snapshot of every aggregate that crossed a snapshot boundary.
    snapshots: Vec<(AggregateRef, Snapshot)>,
    poisoned: bool,
}

impl WriteContext {
    pub(crate) fn new(
        inner: Arc<StoreInner>,
        tx: Box<dyn StorageTransaction>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            tx,
            cancel,
            captured: Vec::new(),
            snapshots: Vec::new(),
            poisoned: false,
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn poison(&mut self, error: Error) -> Error {
        error!(error = %error, "Integrity violation, aborting unit of work");
        self.poisoned = true;
        error
    }

    /// Create a new aggregate, optionally claiming a natural key.
    ///
    /// Returns [`Error::DuplicateKey`] if another aggregate of the same type
    /// already holds the key.
    pub async fn create<A: Aggregate>(&mut self, natural_key: Option<NaturalKey>) -> Result<A> {
        self.ensure_usable()?;
        let aggregate_type_id = race(&self.cancel, self.inner.aggregate_type_id::<A>()).await??;

        let created = race(
            &self.cancel,
            self.tx
                .create_aggregate(aggregate_type_id, natural_key.as_ref()),
        )
        .await?;

        match created {
            Ok(id) => {
                debug!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    aggregate_id = id,
                    "Created aggregate"
                );
                Ok(A::initialize(id))
            }
            Err(StorageError::DuplicateKey(mut e)) => {
                e.aggregate_type = Some(A::aggregate_type()?);
                warn!(error = %e, "Natural key conflict");
                Err(Error::DuplicateKey(e))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Load an aggregate, replaying history up to `max_sequence`.
    ///
    /// Reads through this unit of work's storage transaction. Events applied
    /// in this context are appended only at commit, so they are not replayed.
    pub async fn load<A: Aggregate>(
        &mut self,
        id: i64,
        max_sequence: Option<i64>,
    ) -> Result<Option<A>> {
        self.ensure_usable()?;
        let aggregate_type_id = race(&self.cancel, self.inner.aggregate_type_id::<A>()).await??;

        let loaded = race(
            &self.cancel,
            hydrate::<A, _>(
                self.tx.as_ref(),
                &self.inner.registry,
                aggregate_type_id,
                id,
                max_sequence,
            ),
        )
        .await?;

        match loaded {
            Err(e) if e.is_integrity_violation() => Err(self.poison(e)),
            other => other,
        }
    }

    /// Apply `event` to `aggregate` and capture it for commit.
    ///
    /// The aggregate must advance its sequence by exactly one. If the new
    /// sequence crosses a multiple of the aggregate's snapshot frequency, a
    /// snapshot is queued; queued snapshots are refreshed by every later
    /// apply to the same aggregate. `event_time` defaults to now.
    pub fn apply<A, E>(
        &mut self,
        event: E,
        aggregate: &mut A,
        agent: &Agent,
        event_time: Option<DateTime<Utc>>,
    ) -> Result<()>
    where
        A: Aggregate,
        E: Event + Into<A::Event>,
    {
        self.ensure_usable()?;
        let aggregate_type = A::aggregate_type()?;
        let event_type = E::event_type()?;

        if !self.inner.registry.is_registered::<A>(&event_type) {
            warn!(
                aggregate_type = %aggregate_type,
                event_type = %event_type,
                "Event not registered for aggregate"
            );
            return Err(Error::UnknownEventType {
                aggregate_type,
                event_type,
            });
        }

        let payload = serde_json::to_string(&event)?;
        let event_time = event_time.unwrap_or_else(Utc::now);
        let start = aggregate.sequence();
        let end = start + 1;

        aggregate.apply_event(&event.into(), end, agent, event_time);

        let actual = aggregate.sequence();
        if actual != end {
            return Err(self.poison(Error::SequenceNotAdvanced {
                aggregate_type,
                aggregate_id: aggregate.id(),
                expected: end,
                actual,
            }));
        }

        if let Some(policy) = A::snapshot_policy() {
            let aggregate_ref = AggregateRef::new(aggregate_type.clone(), aggregate.id());
            let queued = self
                .snapshots
                .iter()
                .position(|(queued, _)| *queued == aggregate_ref);

            if queued.is_some() || policy.crosses_boundary(start, end) {
                let snapshot = match aggregate.take_snapshot().and_then(|snapshot| {
                    check_snapshot(snapshot, &aggregate_type, aggregate.id(), policy.version, end)
                }) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        let e = snapshot_error(e, &aggregate_type, aggregate.id());
                        return Err(self.poison(e));
                    }
                };
                match queued {
                    Some(index) => self.snapshots[index].1 = snapshot,
                    None => {
                        debug!(
                            aggregate = %aggregate_ref,
                            sequence = end,
                            "Snapshot due"
                        );
                        self.snapshots.push((aggregate_ref, snapshot));
                    }
                }
            }
        }

        self.captured.push(AggregateEvent {
            aggregate_type,
            aggregate_id: aggregate.id(),
            event_type,
            sequence: end,
            payload,
            agent: agent.clone(),
            event_time,
        });
        Ok(())
    }

    /// Events applied so far, in apply order.
    pub fn captured_events(&self) -> &[AggregateEvent] {
        &self.captured
    }

    /// Aggregates with a snapshot queued for commit.
    pub fn aggregates_requiring_snapshots(&self) -> Vec<AggregateRef> {
        self.snapshots
            .iter()
            .map(|(aggregate_ref, _)| aggregate_ref.clone())
            .collect()
    }

    /// Snapshots that commit will persist.
    pub fn pending_snapshots(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter().map(|(_, snapshot)| snapshot)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Discard this unit of work. Dropping the context has the same effect.
    pub async fn rollback(self) -> Result<()> {
        let discarded = self.captured.len();
        self.tx.rollback().await?;
        debug!(events = discarded, "Rolled back unit of work");
        Ok(())
    }

    /// Persist captured events and queued snapshots, then commit the
    /// storage transaction.
    ///
    /// On any error nothing is persisted.
    pub async fn commit(mut self) -> Result<()> {
        if self.poisoned {
            warn!("Refusing to commit a poisoned unit of work");
            return Err(Error::Poisoned);
        }
        let inner = Arc::clone(&self.inner);

        let events = race(
            &self.cancel,
            try_join_all(self.captured.iter().map(|event| inner.event_dto(event))),
        )
        .await??;
        let event_count = events.len();

        if let Err(e) = race(&self.cancel, self.tx.append_events(events)).await? {
            return Err(inner.describe(e).await);
        }

        for (aggregate_ref, snapshot) in &self.snapshots {
            let dto = race(&self.cancel, inner.snapshot_dto(snapshot)).await??;
            race(&self.cancel, self.tx.save_snapshot(dto)).await??;
            debug!(
                aggregate = %aggregate_ref,
                sequence = snapshot.sequence,
                "Saved snapshot"
            );
        }

        if let Err(e) = race(&self.cancel, self.tx.commit()).await? {
            return Err(inner.describe(e).await);
        }

        info!(
            events = event_count,
            snapshots = self.snapshots.len(),
            "Committed unit of work"
        );
        Ok(())
    }
}

/// Load-only unit of work over committed state.
pub struct ReadContext {
    inner: Arc<StoreInner>,
    cancel: CancellationToken,
}

impl ReadContext {
    pub(crate) fn new(inner: Arc<StoreInner>, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }

    /// Load an aggregate, replaying history up to `max_sequence`.
    pub async fn load<A: Aggregate>(&self, id: i64, max_sequence: Option<i64>) -> Result<Option<A>> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let aggregate_type_id = race(&self.cancel, self.inner.aggregate_type_id::<A>()).await??;

        let loaded = race(
            &self.cancel,
            hydrate::<A, _>(
                self.inner.engine.as_ref(),
                &self.inner.registry,
                aggregate_type_id,
                id,
                max_sequence,
            ),
        )
        .await?;

        if let Err(ref e) = loaded {
            if e.is_integrity_violation() {
                error!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    aggregate_id = id,
                    error = %e,
                    "Integrity violation while loading"
                );
            }
        }
        loaded
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

//! In-memory storage engine.
//!
//! Reference implementation of the storage contract. Committed state lives in
//! a ledger behind one `RwLock`. A [`MemoryTransaction`] stages its writes and
//! applies them under a single ledger write lock at commit, re-checking
//! natural keys and sequences first, so a commit is all-or-nothing and no
//! other writer can interleave between check and insert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    HistoryReader, Result, StorageEngine, StorageError, StorageTransaction, TypeKind,
};
use crate::error::DuplicateKeyError;
use crate::model::{
    Agent, AgentDto, AgentKey, AgentType, AggregateEvent, AggregateType, EventDto, EventType,
    NaturalKey, Snapshot, SnapshotDto,
};
use crate::utils::sequence_validator::check_batch;

/// Type and agent identifiers. Never rolled back.
#[derive(Default)]
struct Vocabulary {
    type_ids: HashMap<(TypeKind, String), i32>,
    type_names: HashMap<(TypeKind, i32), String>,
    next_type_id: HashMap<TypeKind, i32>,
    agent_ids: HashMap<AgentDto, i64>,
    agents: HashMap<i64, AgentDto>,
    next_agent_id: i64,
}

impl Vocabulary {
    fn name(&self, kind: TypeKind, id: i32) -> Result<&str> {
        self.type_names
            .get(&(kind, id))
            .map(String::as_str)
            .ok_or(StorageError::UnknownIdentifier {
                kind,
                id: i64::from(id),
            })
    }

    fn agent(&self, agent_id: i64) -> Result<Agent> {
        let dto = self
            .agents
            .get(&agent_id)
            .ok_or(StorageError::UnknownAgent(agent_id))?;
        let agent_type = AgentType::new(self.name(TypeKind::Agent, dto.agent_type_id)?)?;
        Ok(Agent::new(agent_type, dto.system_id, dto.agent_key.clone()))
    }

    fn resolve_event(&self, dto: &EventDto) -> Result<AggregateEvent> {
        Ok(AggregateEvent {
            aggregate_type: AggregateType::new(
                self.name(TypeKind::Aggregate, dto.aggregate_type_id)?,
            )?,
            aggregate_id: dto.aggregate_id,
            event_type: EventType::new(self.name(TypeKind::Event, dto.event_type_id)?)?,
            sequence: dto.sequence,
            payload: dto.payload.clone(),
            agent: self.agent(dto.agent_id)?,
            event_time: dto.event_time,
        })
    }

    fn resolve_snapshot(&self, dto: &SnapshotDto) -> Result<Snapshot> {
        Ok(Snapshot {
            aggregate_type: AggregateType::new(
                self.name(TypeKind::Aggregate, dto.aggregate_type_id)?,
            )?,
            aggregate_id: dto.aggregate_id,
            version: dto.version,
            sequence: dto.sequence,
            state: dto.state.clone(),
        })
    }
}

/// Committed aggregates, events and snapshots.
#[derive(Default)]
struct Ledger {
    natural_keys: HashMap<(i32, NaturalKey), i64>,
    events: HashMap<i64, Vec<EventDto>>,
    /// Last committed sequence per aggregate id.
    last_sequences: HashMap<i64, i64>,
    snapshots: HashMap<(i32, i64), SnapshotDto>,
}

impl Ledger {
    fn last_sequence(&self, aggregate_id: i64) -> i64 {
        self.last_sequences.get(&aggregate_id).copied().unwrap_or(0)
    }

    fn owner_of(&self, aggregate_type_id: i32, natural_key: &NaturalKey) -> Option<i64> {
        self.natural_keys
            .get(&(aggregate_type_id, natural_key.clone()))
            .copied()
    }
}

struct Inner {
    vocabulary: Mutex<Vocabulary>,
    ledger: RwLock<Ledger>,
    next_aggregate_id: AtomicI64,
}

impl Inner {
    fn vocabulary(&self) -> Result<MutexGuard<'_, Vocabulary>> {
        self.vocabulary
            .lock()
            .map_err(|_| StorageError::Backend("vocabulary lock poisoned".to_string()))
    }
}

/// In-memory storage engine.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct MemoryStorageEngine {
    inner: Arc<Inner>,
}

impl Default for MemoryStorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                vocabulary: Mutex::new(Vocabulary::default()),
                ledger: RwLock::new(Ledger::default()),
                next_aggregate_id: AtomicI64::new(1),
            }),
        }
    }

    /// Number of committed events across all aggregates.
    pub async fn event_count(&self) -> usize {
        self.inner.ledger.read().await.events.values().map(Vec::len).sum()
    }

    /// Last committed sequence of an aggregate, 0 if it has no events.
    pub async fn last_sequence(&self, aggregate_id: i64) -> i64 {
        self.inner.ledger.read().await.last_sequence(aggregate_id)
    }
}

fn select_events(
    events: &[EventDto],
    aggregate_type_id: i32,
    after_sequence: i64,
    max_sequence: Option<i64>,
) -> impl Iterator<Item = &EventDto> {
    events.iter().filter(move |e| {
        e.aggregate_type_id == aggregate_type_id
            && e.sequence > after_sequence
            && max_sequence.map_or(true, |max| e.sequence <= max)
    })
}

fn usable_snapshot(snapshot: &SnapshotDto, version: i32, max_sequence: Option<i64>) -> bool {
    snapshot.version == version && max_sequence.map_or(true, |max| snapshot.sequence <= max)
}

#[async_trait]
impl HistoryReader for MemoryStorageEngine {
    async fn get_events(
        &self,
        aggregate_type_id: i32,
        aggregate_id: i64,
        after_sequence: i64,
        max_sequence: Option<i64>,
    ) -> Result<Vec<AggregateEvent>> {
        let ledger = self.inner.ledger.read().await;
        let Some(events) = ledger.events.get(&aggregate_id) else {
            return Ok(Vec::new());
        };
        let vocabulary = self.inner.vocabulary()?;
        select_events(events, aggregate_type_id, after_sequence, max_sequence)
            .map(|dto| vocabulary.resolve_event(dto))
            .collect()
    }

    async fn get_snapshot(
        &self,
        aggregate_type_id: i32,
        aggregate_id: i64,
        version: i32,
        max_sequence: Option<i64>,
    ) -> Result<Option<Snapshot>> {
        let ledger = self.inner.ledger.read().await;
        match ledger.snapshots.get(&(aggregate_type_id, aggregate_id)) {
            Some(dto) if usable_snapshot(dto, version, max_sequence) => {
                Ok(Some(self.inner.vocabulary()?.resolve_snapshot(dto)?))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl StorageEngine for MemoryStorageEngine {
    async fn get_or_create_type_id(&self, kind: TypeKind, name: &str) -> Result<i32> {
        let mut vocabulary = self.inner.vocabulary()?;
        if let Some(id) = vocabulary.type_ids.get(&(kind, name.to_string())) {
            return Ok(*id);
        }

        let next = vocabulary.next_type_id.entry(kind).or_insert(0);
        *next += 1;
        let id = *next;
        vocabulary.type_ids.insert((kind, name.to_string()), id);
        vocabulary.type_names.insert((kind, id), name.to_string());

        debug!(%kind, name, id, "Registered type name");
        Ok(id)
    }

    async fn get_or_create_agent_id(
        &self,
        agent_type_id: i32,
        agent_key: Option<&AgentKey>,
        system_id: Option<i64>,
    ) -> Result<i64> {
        let mut vocabulary = self.inner.vocabulary()?;
        vocabulary.name(TypeKind::Agent, agent_type_id)?;

        let dto = AgentDto {
            agent_type_id,
            system_id,
            agent_key: agent_key.cloned(),
        };
        if let Some(id) = vocabulary.agent_ids.get(&dto) {
            return Ok(*id);
        }

        vocabulary.next_agent_id += 1;
        let id = vocabulary.next_agent_id;
        vocabulary.agent_ids.insert(dto.clone(), id);
        vocabulary.agents.insert(id, dto);

        debug!(agent_type_id, ?system_id, agent_id = id, "Registered agent");
        Ok(id)
    }

    async fn begin(&self) -> Result<Box<dyn StorageTransaction>> {
        Ok(Box::new(MemoryTransaction::new(Arc::clone(&self.inner))))
    }
}

/// Aggregate created inside an uncommitted transaction.
struct StagedAggregate {
    aggregate_type_id: i32,
    aggregate_id: i64,
    natural_key: Option<NaturalKey>,
}

/// Transaction over a [`MemoryStorageEngine`].
///
/// Writes stay private to the transaction until [`commit`](StorageTransaction::commit).
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    created: Vec<StagedAggregate>,
    events: Vec<EventDto>,
    /// Last staged sequence per aggregate id.
    staged_sequences: HashMap<i64, i64>,
    snapshots: HashMap<(i32, i64), SnapshotDto>,
}

impl MemoryTransaction {
    fn new(inner: Arc<Inner>) -> Self {
        Self {
            inner,
            created: Vec::new(),
            events: Vec::new(),
            staged_sequences: HashMap::new(),
            snapshots: HashMap::new(),
        }
    }

    fn staged_owner_of(&self, aggregate_type_id: i32, natural_key: &NaturalKey) -> Option<i64> {
        self.created
            .iter()
            .find(|a| {
                a.aggregate_type_id == aggregate_type_id
                    && a.natural_key.as_ref() == Some(natural_key)
            })
            .map(|a| a.aggregate_id)
    }

}

#[async_trait]
impl HistoryReader for MemoryTransaction {
    async fn get_events(
        &self,
        aggregate_type_id: i32,
        aggregate_id: i64,
        after_sequence: i64,
        max_sequence: Option<i64>,
    ) -> Result<Vec<AggregateEvent>> {
        let ledger = self.inner.ledger.read().await;
        let committed = ledger
            .events
            .get(&aggregate_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let staged: Vec<EventDto> = self
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();

        let vocabulary = self.inner.vocabulary()?;
        let mut resolved = select_events(committed, aggregate_type_id, after_sequence, max_sequence)
            .chain(select_events(
                &staged,
                aggregate_type_id,
                after_sequence,
                max_sequence,
            ))
            .map(|dto| vocabulary.resolve_event(dto))
            .collect::<Result<Vec<_>>>()?;
        resolved.sort_by_key(|e| e.sequence);
        Ok(resolved)
    }

    async fn get_snapshot(
        &self,
        aggregate_type_id: i32,
        aggregate_id: i64,
        version: i32,
        max_sequence: Option<i64>,
    ) -> Result<Option<Snapshot>> {
        let key = (aggregate_type_id, aggregate_id);
        let ledger = self.inner.ledger.read().await;
        let latest = self.snapshots.get(&key).or_else(|| ledger.snapshots.get(&key));
        match latest {
            Some(dto) if usable_snapshot(dto, version, max_sequence) => {
                Ok(Some(self.inner.vocabulary()?.resolve_snapshot(dto)?))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn create_aggregate(
        &mut self,
        aggregate_type_id: i32,
        natural_key: Option<&NaturalKey>,
    ) -> Result<i64> {
        if let Some(key) = natural_key {
            let committed = self.inner.ledger.read().await.owner_of(aggregate_type_id, key);
            if committed.is_some() || self.staged_owner_of(aggregate_type_id, key).is_some() {
                warn!(aggregate_type_id, natural_key = %key, "Natural key already taken");
                return Err(DuplicateKeyError {
                    aggregate_type_id,
                    aggregate_type: None,
                    natural_key: key.clone(),
                }
                .into());
            }
        }

        let aggregate_id = self.inner.next_aggregate_id.fetch_add(1, Ordering::SeqCst);
        self.created.push(StagedAggregate {
            aggregate_type_id,
            aggregate_id,
            natural_key: natural_key.cloned(),
        });

        debug!(aggregate_type_id, aggregate_id, "Staged aggregate creation");
        Ok(aggregate_id)
    }

    async fn append_events(&mut self, events: Vec<EventDto>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let advanced = {
            let ledger = self.inner.ledger.read().await;
            let staged = &self.staged_sequences;
            check_batch(&events, |aggregate_id| {
                staged
                    .get(&aggregate_id)
                    .copied()
                    .unwrap_or_else(|| ledger.last_sequence(aggregate_id))
            })?
        };

        debug!(count = events.len(), "Staged events");
        self.staged_sequences.extend(advanced);
        self.events.extend(events);
        Ok(())
    }

    async fn save_snapshot(&mut self, snapshot: SnapshotDto) -> Result<()> {
        debug!(
            aggregate_type_id = snapshot.aggregate_type_id,
            aggregate_id = snapshot.aggregate_id,
            sequence = snapshot.sequence,
            "Staged snapshot"
        );
        self.snapshots
            .insert((snapshot.aggregate_type_id, snapshot.aggregate_id), snapshot);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut ledger = this.inner.ledger.write().await;

        for created in &this.created {
            if let Some(ref key) = created.natural_key {
                if ledger.owner_of(created.aggregate_type_id, key).is_some() {
                    warn!(
                        aggregate_type_id = created.aggregate_type_id,
                        natural_key = %key,
                        "Natural key claimed by a concurrent commit"
                    );
                    return Err(DuplicateKeyError {
                        aggregate_type_id: created.aggregate_type_id,
                        aggregate_type: None,
                        natural_key: key.clone(),
                    }
                    .into());
                }
            }
        }

        let advanced = check_batch(&this.events, |aggregate_id| {
            ledger.last_sequence(aggregate_id)
        })?;

        for created in this.created {
            if let Some(key) = created.natural_key {
                ledger
                    .natural_keys
                    .insert((created.aggregate_type_id, key), created.aggregate_id);
            }
        }
        let event_count = this.events.len();
        for event in this.events {
            ledger.events.entry(event.aggregate_id).or_default().push(event);
        }
        ledger.last_sequences.extend(advanced);
        let snapshot_count = this.snapshots.len();
        ledger.snapshots.extend(this.snapshots);

        debug!(event_count, snapshot_count, "Committed memory transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!(
            staged_events = self.events.len(),
            "Rolled back memory transaction"
        );
        Ok(())
    }
}

//! Test utilities: sample aggregates and an instrumented storage engine.
//!
//! Available to unit tests and, with the `test-utils` feature, to
//! downstream crates.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::aggregate::{Aggregate, Event, SnapshotPolicy};
use crate::error::{Error, Result};
use crate::model::{AgentKey, Agent, AgentType, AggregateEvent, Snapshot};
use crate::registry::EventRegistry;
use crate::storage::{
    HistoryReader, MemoryStorageEngine, Result as StorageResult, StorageEngine, StorageError,
    StorageTransaction, TypeKind,
};

// ============================================================================
// Sample aggregates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incremented {
    pub by: i64,
}

impl Event for Incremented {
    const EVENT_TYPE: &'static str = "Incremented";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reset {}

impl Event for Reset {
    const EVENT_TYPE: &'static str = "Reset";
}

#[derive(Debug, Clone, PartialEq)]
pub enum CounterEvent {
    Incremented(Incremented),
    Reset(Reset),
}

impl From<Incremented> for CounterEvent {
    fn from(event: Incremented) -> Self {
        CounterEvent::Incremented(event)
    }
}

impl From<Reset> for CounterEvent {
    fn from(event: Reset) -> Self {
        CounterEvent::Reset(event)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CounterState {
    total: i64,
}

/// Snapshot version of [`Counter`].
pub const COUNTER_SNAPSHOT_VERSION: i32 = 1;

/// Snapshot frequency of [`Counter`].
pub const COUNTER_SNAPSHOT_FREQUENCY: i64 = 10;

/// Running total, snapshotted every 10 events.
#[derive(Debug, Clone, PartialEq)]
pub struct Counter {
    pub id: i64,
    pub sequence: i64,
    pub total: i64,
    /// Events folded in since construction; snapshots restore without events.
    pub events_applied: usize,
    pub last_agent: Option<Agent>,
    pub last_event_time: Option<DateTime<Utc>>,
}

impl Aggregate for Counter {
    const AGGREGATE_TYPE: &'static str = "Counter";
    type Event = CounterEvent;

    fn initialize(id: i64) -> Self {
        Self {
            id,
            sequence: 0,
            total: 0,
            events_applied: 0,
            last_agent: None,
            last_event_time: None,
        }
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn sequence(&self) -> i64 {
        self.sequence
    }

    fn apply_event(
        &mut self,
        event: &CounterEvent,
        sequence: i64,
        agent: &Agent,
        event_time: DateTime<Utc>,
    ) {
        match event {
            CounterEvent::Incremented(e) => self.total += e.by,
            CounterEvent::Reset(_) => self.total = 0,
        }
        self.sequence = sequence;
        self.events_applied += 1;
        self.last_agent = Some(agent.clone());
        self.last_event_time = Some(event_time);
    }

    fn snapshot_policy() -> Option<SnapshotPolicy> {
        Some(SnapshotPolicy::new(
            COUNTER_SNAPSHOT_VERSION,
            COUNTER_SNAPSHOT_FREQUENCY,
        ))
    }

    fn take_snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::capture(
            Self::aggregate_type()?,
            self.id,
            COUNTER_SNAPSHOT_VERSION,
            self.sequence,
            &CounterState { total: self.total },
        )?)
    }

    fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let state: CounterState = snapshot.restore()?;
        self.total = state.total;
        self.sequence = snapshot.sequence;
        Ok(())
    }
}

/// Aggregate that forgets to advance its sequence.
#[derive(Debug, Clone)]
pub struct Stuck {
    pub id: i64,
    pub total: i64,
}

impl Aggregate for Stuck {
    const AGGREGATE_TYPE: &'static str = "Stuck";
    type Event = CounterEvent;

    fn initialize(id: i64) -> Self {
        Self { id, total: 0 }
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn sequence(&self) -> i64 {
        0
    }

    fn apply_event(&mut self, event: &CounterEvent, _: i64, _: &Agent, _: DateTime<Utc>) {
        if let CounterEvent::Incremented(e) = event {
            self.total += e.by;
        }
    }
}

/// Aggregate with a snapshot policy but no snapshot support.
#[derive(Debug, Clone)]
pub struct Unsnapshottable {
    pub id: i64,
    pub sequence: i64,
}

impl Aggregate for Unsnapshottable {
    const AGGREGATE_TYPE: &'static str = "Unsnapshottable";
    type Event = CounterEvent;

    fn initialize(id: i64) -> Self {
        Self { id, sequence: 0 }
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn sequence(&self) -> i64 {
        self.sequence
    }

    fn apply_event(&mut self, _: &CounterEvent, sequence: i64, _: &Agent, _: DateTime<Utc>) {
        self.sequence = sequence;
    }

    fn snapshot_policy() -> Option<SnapshotPolicy> {
        Some(SnapshotPolicy::new(1, 1))
    }
}

/// Aggregate whose snapshots always claim sequence 0.
#[derive(Debug, Clone)]
pub struct StaleSnapshot {
    pub id: i64,
    pub sequence: i64,
    pub total: i64,
}

impl Aggregate for StaleSnapshot {
    const AGGREGATE_TYPE: &'static str = "StaleSnapshot";
    type Event = CounterEvent;

    fn initialize(id: i64) -> Self {
        Self {
            id,
            sequence: 0,
            total: 0,
        }
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn sequence(&self) -> i64 {
        self.sequence
    }

    fn apply_event(&mut self, event: &CounterEvent, sequence: i64, _: &Agent, _: DateTime<Utc>) {
        if let CounterEvent::Incremented(e) = event {
            self.total += e.by;
        }
        self.sequence = sequence;
    }

    fn snapshot_policy() -> Option<SnapshotPolicy> {
        Some(SnapshotPolicy::new(1, 2))
    }

    fn take_snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::capture(
            Self::aggregate_type()?,
            self.id,
            1,
            0,
            &CounterState { total: self.total },
        )?)
    }
}

/// Aggregate with an empty type name. Cannot be registered.
#[derive(Debug, Clone)]
pub struct Nameless {
    pub id: i64,
}

impl Aggregate for Nameless {
    const AGGREGATE_TYPE: &'static str = "";
    type Event = CounterEvent;

    fn initialize(id: i64) -> Self {
        Self { id }
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn sequence(&self) -> i64 {
        0
    }

    fn apply_event(&mut self, _: &CounterEvent, _: i64, _: &Agent, _: DateTime<Utc>) {}
}

/// Registry knowing every sample aggregate.
pub fn sample_registry() -> EventRegistry {
    EventRegistry::builder()
        .register::<Counter, Incremented>()
        .register::<Counter, Reset>()
        .register::<Stuck, Incremented>()
        .register::<Unsnapshottable, Incremented>()
        .register::<StaleSnapshot, Incremented>()
        .build()
        .expect("sample registrations are valid")
}

/// Agent attributed to sample events.
pub fn operator() -> Agent {
    Agent::keyed(
        AgentType::new("Operator").expect("valid agent type"),
        AgentKey::new("alice").expect("valid agent key"),
    )
}

// ============================================================================
// Instrumented storage
// ============================================================================

/// Memory engine that counts vocabulary lookups and can fail or stall reads.
#[derive(Default)]
pub struct MockStorageEngine {
    engine: MemoryStorageEngine,
    type_lookups: AtomicUsize,
    agent_lookups: AtomicUsize,
    fail_on_get: RwLock<bool>,
    read_delay: RwLock<Option<Duration>>,
}

impl MockStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped engine, for direct inspection.
    pub fn inner(&self) -> &MemoryStorageEngine {
        &self.engine
    }

    pub fn type_lookups(&self) -> usize {
        self.type_lookups.load(Ordering::SeqCst)
    }

    pub fn agent_lookups(&self) -> usize {
        self.agent_lookups.load(Ordering::SeqCst)
    }

    pub async fn set_fail_on_get(&self, fail: bool) {
        *self.fail_on_get.write().await = fail;
    }

    /// Stall every history read by `delay`.
    pub async fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.write().await = delay;
    }

    async fn before_read(&self) -> StorageResult<()> {
        if *self.fail_on_get.read().await {
            return Err(StorageError::Backend("simulated read failure".to_string()));
        }
        let delay = *self.read_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryReader for MockStorageEngine {
    async fn get_events(
        &self,
        aggregate_type_id: i32,
        aggregate_id: i64,
        after_sequence: i64,
        max_sequence: Option<i64>,
    ) -> StorageResult<Vec<AggregateEvent>> {
        self.before_read().await?;
        self.engine
            .get_events(aggregate_type_id, aggregate_id, after_sequence, max_sequence)
            .await
    }

    async fn get_snapshot(
        &self,
        aggregate_type_id: i32,
        aggregate_id: i64,
        version: i32,
        max_sequence: Option<i64>,
    ) -> StorageResult<Option<Snapshot>> {
        self.before_read().await?;
        self.engine
            .get_snapshot(aggregate_type_id, aggregate_id, version, max_sequence)
            .await
    }
}

#[async_trait]
impl StorageEngine for MockStorageEngine {
    async fn get_or_create_type_id(&self, kind: TypeKind, name: &str) -> StorageResult<i32> {
        self.type_lookups.fetch_add(1, Ordering::SeqCst);
        self.engine.get_or_create_type_id(kind, name).await
    }

    async fn get_or_create_agent_id(
        &self,
        agent_type_id: i32,
        agent_key: Option<&AgentKey>,
        system_id: Option<i64>,
    ) -> StorageResult<i64> {
        self.agent_lookups.fetch_add(1, Ordering::SeqCst);
        self.engine
            .get_or_create_agent_id(agent_type_id, agent_key, system_id)
            .await
    }

    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>> {
        self.engine.begin().await
    }
}

/// Assert that an error is an integrity violation.
pub fn assert_integrity_violation(error: &Error) {
    assert!(
        error.is_integrity_violation(),
        "expected integrity violation, got {error:?}"
    );
}

//! Shared fixtures for integration tests.
//!
//! A `User` aggregate with two events, snapshotted every 10 events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chronik::storage::MemoryStorageEngine;
use chronik::{
    Agent, AgentKey, AgentType, Aggregate, Event, EventRegistry, EventStore, Result, Snapshot,
    SnapshotPolicy,
};

pub const USER_SNAPSHOT_VERSION: i32 = 1;
pub const USER_SNAPSHOT_FREQUENCY: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistered {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Event for UserRegistered {
    const EVENT_TYPE: &'static str = "UserRegistered";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailChanged {
    pub email: String,
}

impl Event for EmailChanged {
    const EVENT_TYPE: &'static str = "EmailChanged";
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    Registered(UserRegistered),
    EmailChanged(EmailChanged),
}

impl From<UserRegistered> for UserEvent {
    fn from(event: UserRegistered) -> Self {
        UserEvent::Registered(event)
    }
}

impl From<EmailChanged> for UserEvent {
    fn from(event: EmailChanged) -> Self {
        UserEvent::EmailChanged(event)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserState {
    first_name: String,
    last_name: String,
    email: String,
    email_changes: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct User {
    pub id: i64,
    pub sequence: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub email_changes: u32,
    pub updated_by: Option<Agent>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for User {
    const AGGREGATE_TYPE: &'static str = "User";
    type Event = UserEvent;

    fn initialize(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
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
        event: &UserEvent,
        sequence: i64,
        agent: &Agent,
        event_time: DateTime<Utc>,
    ) {
        match event {
            UserEvent::Registered(e) => {
                self.first_name = e.first_name.clone();
                self.last_name = e.last_name.clone();
                self.email = e.email.clone();
            }
            UserEvent::EmailChanged(e) => {
                self.email = e.email.clone();
                self.email_changes += 1;
            }
        }
        self.sequence = sequence;
        self.updated_by = Some(agent.clone());
        self.updated_at = Some(event_time);
    }

    fn snapshot_policy() -> Option<SnapshotPolicy> {
        Some(SnapshotPolicy::new(
            USER_SNAPSHOT_VERSION,
            USER_SNAPSHOT_FREQUENCY,
        ))
    }

    fn take_snapshot(&self) -> Result<Snapshot> {
        let state = UserState {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            email_changes: self.email_changes,
        };
        Ok(Snapshot::capture(
            Self::aggregate_type()?,
            self.id,
            USER_SNAPSHOT_VERSION,
            self.sequence,
            &state,
        )?)
    }

    fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let state: UserState = snapshot.restore()?;
        self.first_name = state.first_name;
        self.last_name = state.last_name;
        self.email = state.email;
        self.email_changes = state.email_changes;
        self.sequence = snapshot.sequence;
        Ok(())
    }
}

pub fn user_registry() -> EventRegistry {
    EventRegistry::builder()
        .register::<User, UserRegistered>()
        .register::<User, EmailChanged>()
        .build()
        .expect("user registrations are valid")
}

/// Store over a fresh memory engine, plus a handle to inspect the engine.
pub fn memory_store() -> (EventStore, MemoryStorageEngine) {
    let engine = MemoryStorageEngine::new();
    let store = EventStore::new(Arc::new(engine.clone()), user_registry());
    (store, engine)
}

pub fn user_service() -> Agent {
    Agent::keyed(
        AgentType::new("UserService").unwrap(),
        AgentKey::new("signup").unwrap(),
    )
}

pub fn robert() -> UserRegistered {
    UserRegistered {
        first_name: "Robert".to_string(),
        last_name: "Chavez".to_string(),
        email: "rchavez@example.com".to_string(),
    }
}

//! Event registry: which payload decoder handles which stored event.
//!
//! Stored events carry only their type names. The registry maps each
//! `(aggregate, event type)` pair to a decoder producing the aggregate's
//! event enum. Registrations are explicit and validated once, at
//! [`EventRegistryBuilder::build`].
//!
//! # Example
//!
//! ```ignore
//! let registry = EventRegistry::builder()
//!     .register::<User, UserRegistered>()
//!     .register::<User, UserUpdated>()
//!     .build()?;
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;

use tracing::debug;

use crate::aggregate::{Aggregate, Event};
use crate::model::{AggregateType, EventType, NameError};

/// Decodes a stored payload into an aggregate's event enum.
pub type Decoder<E> = fn(&str) -> serde_json::Result<E>;

/// Errors raised while building an [`EventRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{0}")]
    InvalidName(#[from] NameError),

    #[error("Event type {event_type} registered twice for aggregate type {aggregate_type}")]
    DuplicateEvent {
        aggregate_type: AggregateType,
        event_type: EventType,
    },

    #[error("Aggregate type {0} is claimed by more than one aggregate")]
    ConflictingAggregate(AggregateType),
}

fn decode<A, E>(payload: &str) -> serde_json::Result<A::Event>
where
    A: Aggregate,
    E: Event + Into<A::Event>,
{
    serde_json::from_str::<E>(payload).map(Into::into)
}

struct AggregateEntry {
    aggregate_type: AggregateType,
    /// `Decoder<A::Event>` per event type, type-erased.
    decoders: HashMap<EventType, Box<dyn Any + Send + Sync>>,
}

/// Immutable `(aggregate, event type) → decoder` map.
pub struct EventRegistry {
    aggregates: HashMap<TypeId, AggregateEntry>,
}

impl EventRegistry {
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::new()
    }

    /// Decoder for `event_type` stored against aggregate `A`.
    pub fn decoder<A: Aggregate>(&self, event_type: &EventType) -> Option<Decoder<A::Event>> {
        self.aggregates
            .get(&TypeId::of::<A>())?
            .decoders
            .get(event_type)?
            .downcast_ref::<Decoder<A::Event>>()
            .copied()
    }

    pub fn is_registered<A: Aggregate>(&self, event_type: &EventType) -> bool {
        self.aggregates
            .get(&TypeId::of::<A>())
            .is_some_and(|entry| entry.decoders.contains_key(event_type))
    }

    /// Registered event types of an aggregate, sorted by name.
    pub fn event_types<A: Aggregate>(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self
            .aggregates
            .get(&TypeId::of::<A>())
            .map(|entry| entry.decoders.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    /// Registered aggregate types, sorted by name.
    pub fn aggregate_types(&self) -> Vec<AggregateType> {
        let mut types: Vec<AggregateType> = self
            .aggregates
            .values()
            .map(|entry| entry.aggregate_type.clone())
            .collect();
        types.sort();
        types
    }

    /// Total number of registered `(aggregate, event type)` pairs.
    pub fn len(&self) -> usize {
        self.aggregates.values().map(|e| e.decoders.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Registration {
    aggregate: TypeId,
    aggregate_type: &'static str,
    event_type: &'static str,
    decoder: Box<dyn Any + Send + Sync>,
}

/// Builder for an [`EventRegistry`].
#[derive(Default)]
pub struct EventRegistryBuilder {
    registrations: Vec<Registration>,
}

impl EventRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register event payload `E` for aggregate `A`.
    pub fn register<A, E>(mut self) -> Self
    where
        A: Aggregate,
        E: Event + Into<A::Event>,
    {
        let decoder: Decoder<A::Event> = decode::<A, E>;
        self.registrations.push(Registration {
            aggregate: TypeId::of::<A>(),
            aggregate_type: A::AGGREGATE_TYPE,
            event_type: E::EVENT_TYPE,
            decoder: Box::new(decoder),
        });
        self
    }

    /// Validate every registration and freeze the registry.
    pub fn build(self) -> Result<EventRegistry, RegistryError> {
        let mut aggregates: HashMap<TypeId, AggregateEntry> = HashMap::new();
        let mut owners: HashMap<AggregateType, TypeId> = HashMap::new();

        for registration in self.registrations {
            let aggregate_type = AggregateType::new(registration.aggregate_type)?;
            let event_type = EventType::new(registration.event_type)?;

            let owner = *owners
                .entry(aggregate_type.clone())
                .or_insert(registration.aggregate);
            if owner != registration.aggregate {
                return Err(RegistryError::ConflictingAggregate(aggregate_type));
            }

            let entry = aggregates
                .entry(registration.aggregate)
                .or_insert_with(|| AggregateEntry {
                    aggregate_type: aggregate_type.clone(),
                    decoders: HashMap::new(),
                });
            if entry.decoders.contains_key(&event_type) {
                return Err(RegistryError::DuplicateEvent {
                    aggregate_type,
                    event_type,
                });
            }
            entry.decoders.insert(event_type, registration.decoder);
        }

        let registry = EventRegistry { aggregates };
        debug!(
            aggregates = registry.aggregates.len(),
            events = registry.len(),
            "Built event registry"
        );
        Ok(registry)
    }
}

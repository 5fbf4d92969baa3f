//! Core aggregate, command and event traits.

use common::NamedAggregate;
use event_store::EventBody;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::registry::{CommandRegistry, SourcingRegistry};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The event type name stored with every event.
    const NAME: &'static str;
}

/// Trait for commands.
pub trait Command: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The command type name used for routing.
    const NAME: &'static str;

    /// Creates the aggregate. Create commands never rehydrate.
    const IS_CREATE: bool = false;

    /// May run against an aggregate that has no events yet.
    const ALLOW_CREATE: bool = false;
}

/// Trait for aggregates in an event-sourced system.
///
/// The implementing type is the aggregate's state. Its behaviour is
/// registered explicitly: command handlers in [`Aggregate::register_commands`]
/// and event application rules in [`Aggregate::register_sourcing`]. Both
/// registries are built once, when the aggregate's metadata is created.
pub trait Aggregate:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const CONTEXT_NAME: &'static str;
    const AGGREGATE_NAME: &'static str;

    fn named_aggregate() -> NamedAggregate {
        NamedAggregate::new(Self::CONTEXT_NAME, Self::AGGREGATE_NAME)
    }

    /// Registers the command handlers of this aggregate.
    fn register_commands(registry: &mut CommandRegistry<Self>);

    /// Registers how each event type changes the state.
    ///
    /// Events without a rule still advance the aggregate version.
    fn register_sourcing(registry: &mut SourcingRegistry<Self>);
}

/// Events produced by a command handler, in order.
#[derive(Debug, Default)]
pub struct Events {
    events: Vec<(&'static str, serde_json::Result<serde_json::Value>)>,
}

impl Events {
    /// A handler result that changes nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn one<E: Event>(event: E) -> Self {
        Self::none().and(event)
    }

    pub fn and<E: Event>(mut self, event: E) -> Self {
        self.events.push((E::NAME, serde_json::to_value(&event)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn into_bodies(self) -> serde_json::Result<Vec<EventBody>> {
        self.events
            .into_iter()
            .map(|(name, body)| Ok(EventBody::new(name, body?)))
            .collect()
    }
}

/// Marks an aggregate deleted. Registered for every aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteAggregate {}

impl Command for DeleteAggregate {
    const NAME: &'static str = "DeleteAggregate";
}

/// Restores a deleted aggregate. Registered for every aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoverAggregate {}

impl Command for RecoverAggregate {
    const NAME: &'static str = "RecoverAggregate";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateDeleted {}

impl Event for AggregateDeleted {
    const NAME: &'static str = "AggregateDeleted";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateRecovered {}

impl Event for AggregateRecovered {
    const NAME: &'static str = "AggregateRecovered";
}

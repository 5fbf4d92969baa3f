//! Core reaction trait and the registry of reactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{FunctionInfo, NamedAggregate};
use event_store::{DomainEvent, DomainEventStream};
use modeling::Event;

/// A function that reacts to published events: a projection, a saga step,
/// a notification sender.
///
/// Reactions run after the originating command has committed, so a failing
/// reaction never affects the aggregate. Failures of retryable reactions go
/// to the registered failure handler; others are logged and dropped.
#[async_trait]
pub trait Reaction: Send + Sync {
    /// Identity of this reaction, unique per process.
    fn function_info(&self) -> FunctionInfo;

    /// Whether this reaction handles `event` of an aggregate of type
    /// `named_aggregate`.
    fn subscribes(&self, named_aggregate: &NamedAggregate, event: &DomainEvent) -> bool;

    /// Whether failures are handed to the compensation engine.
    fn retry(&self) -> bool {
        true
    }

    async fn react(&self, stream: &DomainEventStream, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Decodes `event` as `E`, or returns `None` when it is another event type.
pub fn decode<E: Event>(event: &DomainEvent) -> Option<anyhow::Result<E>> {
    if event.name != E::NAME {
        return None;
    }
    Some(serde_json::from_value(event.body.clone()).map_err(anyhow::Error::from))
}

/// Reactions by function identity.
#[derive(Default, Clone)]
pub struct ReactionRegistry {
    reactions: HashMap<FunctionInfo, Arc<dyn Reaction>>,
}

impl ReactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reaction, replacing any reaction with the same identity.
    pub fn register(&mut self, reaction: Arc<dyn Reaction>) -> &mut Self {
        let function = reaction.function_info();
        if self.reactions.insert(function.clone(), reaction).is_some() {
            tracing::warn!(%function, "Reaction registered twice, keeping the last one");
        }
        self
    }

    pub fn get(&self, function: &FunctionInfo) -> Option<Arc<dyn Reaction>> {
        self.reactions.get(function).cloned()
    }

    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Reaction>> {
        self.reactions.values()
    }
}

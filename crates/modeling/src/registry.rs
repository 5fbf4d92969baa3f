//! Explicit command and sourcing registries.
//!
//! Every aggregate type builds its registries once, at startup, from
//! [`Aggregate::register_commands`] and [`Aggregate::register_sourcing`].
//! Routing a message is then a map lookup by type name.

use std::collections::HashMap;

use common::NamedAggregate;
use serde::Deserialize;

use crate::aggregate::{
    Aggregate, AggregateDeleted, AggregateRecovered, Command, DeleteAggregate, Event, Events,
    RecoverAggregate,
};
use crate::command::CommandMessage;
use crate::error::{CommandRejected, Result};
use crate::state::StateAggregate;

type CommandHandlerFn<S> =
    dyn Fn(&StateAggregate<S>, &CommandMessage) -> Result<Events> + Send + Sync;

type SourcingFn<S> = dyn Fn(&mut S, &serde_json::Value) -> serde_json::Result<()> + Send + Sync;

/// A registered command handler plus its creation flags.
pub struct CommandEntry<S> {
    pub is_create: bool,
    pub allow_create: bool,
    handler: Box<CommandHandlerFn<S>>,
}

impl<S> CommandEntry<S> {
    /// Decodes the message body and runs the handler.
    pub fn handle(&self, state: &StateAggregate<S>, message: &CommandMessage) -> Result<Events> {
        (self.handler)(state, message)
    }
}

/// Maps command type names to handlers.
pub struct CommandRegistry<S> {
    entries: HashMap<&'static str, CommandEntry<S>>,
}

impl<S: Aggregate> CommandRegistry<S> {
    /// Creates a registry holding the built-in delete and recover commands.
    pub fn new() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };
        registry
            .on::<DeleteAggregate, _>(|_, _| Ok(Events::one(AggregateDeleted {})))
            .on::<RecoverAggregate, _>(|state, _| {
                if !state.deleted() {
                    return Err(CommandRejected::illegal_state("aggregate is not deleted"));
                }
                Ok(Events::one(AggregateRecovered {}))
            });
        registry
    }

    /// Registers the handler for command type `C`, replacing any previous one.
    pub fn on<C, F>(&mut self, handler: F) -> &mut Self
    where
        C: Command,
        F: Fn(&StateAggregate<S>, C) -> std::result::Result<Events, CommandRejected>
            + Send
            + Sync
            + 'static,
    {
        let entry = CommandEntry {
            is_create: C::IS_CREATE,
            allow_create: C::ALLOW_CREATE,
            handler: Box::new(move |state: &StateAggregate<S>, message: &CommandMessage| {
                let command = C::deserialize(&message.body)?;
                Ok(handler(state, command)?)
            }),
        };
        self.entries.insert(C::NAME, entry);
        self
    }

    pub fn get(&self, name: &str) -> Option<&CommandEntry<S>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

impl<S: Aggregate> Default for CommandRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps event type names to state transitions.
pub struct SourcingRegistry<S> {
    rules: HashMap<&'static str, Box<SourcingFn<S>>>,
}

impl<S: 'static> SourcingRegistry<S> {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Registers how event type `E` changes the state.
    pub fn on<E, F>(&mut self, apply: F) -> &mut Self
    where
        E: Event,
        F: Fn(&mut S, E) + Send + Sync + 'static,
    {
        self.rules.insert(
            E::NAME,
            Box::new(move |state: &mut S, body: &serde_json::Value| {
                let event = E::deserialize(body)?;
                apply(state, event);
                Ok(())
            }),
        );
        self
    }

    /// Applies one event. Returns `false` when no rule exists for `name`.
    pub fn apply(
        &self,
        state: &mut S,
        name: &str,
        body: &serde_json::Value,
    ) -> serde_json::Result<bool> {
        match self.rules.get(name) {
            Some(rule) => {
                rule(state, body)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<S: 'static> Default for SourcingRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the engine needs to know about one aggregate type.
pub struct AggregateMetadata<A: Aggregate> {
    pub named_aggregate: NamedAggregate,
    pub commands: CommandRegistry<A>,
    pub sourcing: SourcingRegistry<A>,
}

impl<A: Aggregate> AggregateMetadata<A> {
    /// Builds both registries of `A`.
    pub fn new() -> Self {
        let mut commands = CommandRegistry::new();
        A::register_commands(&mut commands);
        let mut sourcing = SourcingRegistry::new();
        A::register_sourcing(&mut sourcing);

        Self {
            named_aggregate: A::named_aggregate(),
            commands,
            sourcing,
        }
    }
}

impl<A: Aggregate> Default for AggregateMetadata<A> {
    fn default() -> Self {
        Self::new()
    }
}

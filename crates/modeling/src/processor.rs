//! Runs one command against one aggregate instance.

use common::AggregateId;
use event_store::{AppendOutcome, DomainEventStream, EventStore, Version};

use crate::aggregate::{Aggregate, Command, RecoverAggregate};
use crate::command::CommandMessage;
use crate::error::{ModelingError, Result};
use crate::repository::AggregateRepository;
use crate::state::StateAggregate;

/// The result of a processed command.
#[derive(Debug)]
pub struct CommandOutcome<A> {
    /// The aggregate after the new stream was sourced.
    pub state: StateAggregate<A>,
    /// `None` when the handler produced no events.
    pub stream: Option<DomainEventStream>,
    /// Version before the command ran.
    pub previous_version: Version,
    pub append: Option<AppendOutcome>,
}

impl<A> CommandOutcome<A> {
    /// Whether a new stream was written, as opposed to nothing or a replay.
    pub fn appended(&self) -> bool {
        self.append == Some(AppendOutcome::Appended)
    }
}

/// Validates a command, runs its handler and persists the produced events.
pub struct CommandProcessor<A: Aggregate> {
    repository: AggregateRepository<A>,
}

impl<A: Aggregate> Clone for CommandProcessor<A> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
        }
    }
}

impl<A: Aggregate> CommandProcessor<A> {
    pub fn new(repository: AggregateRepository<A>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &AggregateRepository<A> {
        &self.repository
    }

    /// Processes a command.
    ///
    /// Create commands start from an empty aggregate so a second create for
    /// the same id is rejected by the store. Other commands run against the
    /// rehydrated aggregate and are checked, in order, for the expected
    /// version, existence, deletion and a registered handler.
    #[tracing::instrument(
        skip(self, message),
        fields(aggregate_id = %message.aggregate_id, command = %message.name, command_id = %message.id)
    )]
    pub async fn process(&self, message: &CommandMessage) -> Result<CommandOutcome<A>> {
        message.validate()?;
        let metadata = self.repository.metadata();
        if message.aggregate_id.named_aggregate() != &metadata.named_aggregate {
            return Err(ModelingError::InvalidCommand(format!(
                "{} is not an aggregate of type {}",
                message.aggregate_id, metadata.named_aggregate
            )));
        }

        let mut state = if message.is_create {
            StateAggregate::new(message.aggregate_id.clone())
        } else {
            self.repository.rehydrate(&message.aggregate_id).await?
        };
        check_preconditions(&state, message)?;

        let entry = metadata.commands.get(&message.name).ok_or_else(|| {
            ModelingError::UndefinedCommand {
                named_aggregate: metadata.named_aggregate.clone(),
                command: message.name.clone(),
            }
        })?;

        let previous_version = state.version();
        let events = entry.handle(&state, message)?;
        if events.is_empty() {
            tracing::debug!("Command produced no events");
            return Ok(CommandOutcome {
                state,
                stream: None,
                previous_version,
                append: None,
            });
        }

        let stream = DomainEventStream::new(
            message.aggregate_id.clone(),
            previous_version,
            message.request_id.clone(),
            message.id.clone(),
            message.header.clone(),
            events.into_bodies()?,
        );
        state.on_sourcing(&stream, &metadata.sourcing)?;

        let append = self.repository.event_store().append(stream.clone()).await?;
        tracing::debug!(version = %stream.version, ?append, "Command processed");

        Ok(CommandOutcome {
            state,
            stream: Some(stream),
            previous_version,
            append: Some(append),
        })
    }

    /// Current version of an aggregate according to the event log.
    pub async fn last_version(&self, aggregate_id: &AggregateId) -> Result<Version> {
        Ok(self
            .repository
            .event_store()
            .last_version(aggregate_id)
            .await?)
    }
}

fn check_preconditions<A>(state: &StateAggregate<A>, message: &CommandMessage) -> Result<()> {
    if let Some(expected) = message.version {
        if expected != state.version() {
            return Err(ModelingError::CommandExpectVersionConflict {
                aggregate_id: message.aggregate_id.clone(),
                expected,
                actual: state.version(),
            });
        }
    }
    if !state.initialized() && !message.is_create && !message.allow_create {
        return Err(ModelingError::AggregateNotFound(message.aggregate_id.clone()));
    }
    if state.deleted() && message.name != RecoverAggregate::NAME {
        return Err(ModelingError::AggregateDeleted(message.aggregate_id.clone()));
    }
    Ok(())
}
